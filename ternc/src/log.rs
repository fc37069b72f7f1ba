//! The implementation of the `TERND_LOG_*` environment variables.
//!
//! `TERND_LOG_ASM` dumps the final assembly listing of every compiled method;
//! `TERND_LOG_IR` dumps the input graph as seen by the backend. A value of
//! `-` sends output to stderr; any other value is treated as a file path to
//! append to.

use std::{env, fs::File, io::Write, sync::LazyLock};

static LOG_ASM: LazyLock<Option<String>> = LazyLock::new(|| env::var("TERND_LOG_ASM").ok());
static LOG_IR: LazyLock<Option<String>> = LazyLock::new(|| env::var("TERND_LOG_IR").ok());

pub(crate) fn log_asm_enabled() -> bool {
    LOG_ASM.is_some()
}

pub(crate) fn log_ir_enabled() -> bool {
    LOG_IR.is_some()
}

pub(crate) fn log_asm(listing: &str) {
    log_to(LOG_ASM.as_deref(), listing);
}

pub(crate) fn log_ir(ir: &str) {
    log_to(LOG_IR.as_deref(), ir);
}

fn log_to(target: Option<&str>, text: &str) {
    match target {
        Some("-") => eprintln!("{text}"),
        Some(path) => {
            File::options()
                .append(true)
                .create(true)
                .open(path)
                .and_then(|mut f| f.write_all(text.as_bytes()))
                .ok();
        }
        None => (),
    }
}
