//! Minimal CLI driver for the compile pipeline.
//!
//! Reads a `CompileRequest` as JSON from a file argument (or stdin if no
//! argument is given), compiles it against a `NoopSource` — snippets must
//! already be embedded in the request's `implementation` fields, since
//! there is no catalogue to fall back to here — and prints the resulting
//! OpenQASM 3.1 text to stdout. On failure, prints the error to stderr and
//! exits non-zero.
//!
//! This is glue for running the crate end-to-end without a host service,
//! not the REST transport.

#![forbid(unsafe_code)]

use std::{env, fs, io::Read as _};

use leqo_compile::{
    cancel::CancellationToken,
    service::{CompileService, DEFAULT_MAX_UNROLL},
    source::NoopSource,
    wire::CompileRequest,
};

fn read_input() -> anyhow::Result<String> {
    match env::args().nth(1) {
        Some(path) => {
            fs::read_to_string(&path).map_err(|e| anyhow::anyhow!("read {path}: {e}"))
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| anyhow::anyhow!("read stdin: {e}"))?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let text = read_input()?;
    let req: CompileRequest =
        serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("invalid compile request: {e}"))?;

    let service = CompileService::new(NoopSource, DEFAULT_MAX_UNROLL, req.options.optimize);
    let token = CancellationToken::new();
    let response = service.compile(&req, &token).await;

    match response.program {
        Some(program) => {
            print!("{program}");
            Ok(())
        }
        None => {
            let error = response.error.expect("a failed compile always carries an error");
            eprintln!("compile failed: node {} ({}): {}", error.node.as_deref().unwrap_or("<none>"), error.kind, error.message);
            std::process::exit(1);
        }
    }
}
