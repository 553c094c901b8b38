use devdb_common::ConfigError;
use devdb_migrate::MigrateError;
use devdb_supervisor::SupervisorError;

/// Ctrl-C arrived before the service was up; whatever was launched has been
/// stopped.
#[derive(Debug, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;

/// Map an error to its printed kind and process exit code.
///
/// Walks the whole context chain, so wrapping with `.context(..)` keeps the
/// classification.
pub fn classify(err: &anyhow::Error) -> (&'static str, u8) {
    for cause in err.chain() {
        if cause.downcast_ref::<Interrupted>().is_some() {
            return ("interrupted", 130);
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ("config", 2);
        }
        if let Some(e) = cause.downcast_ref::<SupervisorError>() {
            let kind = e.kind();
            return (kind, code_for(kind));
        }
        if let Some(e) = cause.downcast_ref::<MigrateError>() {
            let kind = e.kind();
            return (kind, code_for(kind));
        }
    }
    ("other", 1)
}

fn code_for(kind: &str) -> u8 {
    match kind {
        "config" => 2,
        "launch" => 10,
        "timed-out" => 11,
        "malformed-migration" => 20,
        "history-conflict" => 21,
        "checksum-mismatch" => 22,
        "execution" => 23,
        "ledger" => 24,
        "interrupted" => 130,
        _ => 1,
    }
}
