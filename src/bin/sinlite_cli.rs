//! Batch evaluation front-end for the engine.
//!
//! Examples:
//!   sinlite-cli run input.json
//!   sinlite-cli run input.json --ticks 10 --pretty
//!   sinlite-cli run input.json --baseline dreams.json
//!   cat input.json | sinlite-cli run -
//!
//! The input file holds one `EvaluateInput` JSON object; `-` reads it from
//! stdin. Output is one JSON record per tick on stdout.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::process;

use tracing_subscriber::EnvFilter;

use sinlite::baseline::DreamBaseline;
use sinlite::contract::{Contract, ContractConfig};
use sinlite::host::PluginHost;
use sinlite::runtime::{EvaluateInput, Runtime, SnapshotHub};

struct Args {
    input: String,
    baseline: Option<String>,
    ticks: u64,
    pretty: bool,
}

fn usage() -> ! {
    eprintln!("Usage: sinlite-cli run <input.json|-> [options]\n");
    eprintln!("Options:");
    eprintln!("  --baseline <file>   Dream-pack baseline samples (JSON array)");
    eprintln!("  --ticks <n>         Evaluate the input n times (default 1)");
    eprintln!("  --pretty            Pretty-print the output records");
    process::exit(1);
}

fn fail(msg: &str) -> ! {
    eprintln!("Error: {msg}");
    process::exit(1);
}

fn parse_args() -> Args {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 || args[0] != "run" {
        usage();
    }
    args.drain(0..1);

    let input = args.remove(0);
    let mut parsed = Args {
        input,
        baseline: None,
        ticks: 1,
        pretty: false,
    };

    let mut iter = args.into_iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--baseline" => {
                let Some(path) = iter.next() else { usage() };
                parsed.baseline = Some(path);
            }
            "--ticks" => {
                let Some(raw) = iter.next() else { usage() };
                parsed.ticks = raw
                    .parse()
                    .unwrap_or_else(|_| fail("--ticks must be a positive number"));
                if parsed.ticks == 0 {
                    fail("--ticks must be a positive number");
                }
            }
            "--pretty" => parsed.pretty = true,
            _ => usage(),
        }
    }
    parsed
}

fn read_input(path: &str) -> Result<EvaluateInput, String> {
    let mut raw = String::new();
    if path == "-" {
        std::io::stdin()
            .read_to_string(&mut raw)
            .map_err(|e| format!("read stdin: {e}"))?;
    } else {
        let file = File::open(path).map_err(|e| format!("open {path}: {e}"))?;
        BufReader::new(file)
            .read_to_string(&mut raw)
            .map_err(|e| format!("read {path}: {e}"))?;
    }
    serde_json::from_str(&raw).map_err(|e| format!("parse input: {e}"))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();

    let input = read_input(&args.input).unwrap_or_else(|e| fail(&e));
    let baseline = args.baseline.as_deref().map(|path| {
        DreamBaseline::load(Path::new(path)).unwrap_or_else(|e| fail(&format!("baseline: {e}")))
    });

    let contract = match Contract::new(ContractConfig::default()) {
        Ok(contract) => contract,
        Err(e) => fail(&format!("contract: {e}")),
    };
    let host = PluginHost::new(contract.bias_clamp);
    let mut runtime = Runtime::new(contract, None, host, SnapshotHub::new());

    for tick in 0..args.ticks {
        let frame = baseline
            .as_ref()
            .and_then(|b| b.get(tick))
            .cloned()
            .map(sinlite::baseline::BaselineFrame::uniform);
        let output = runtime.evaluate(&input, frame.as_ref());
        let rendered = if args.pretty {
            serde_json::to_string_pretty(&output)
        } else {
            serde_json::to_string(&output)
        };
        match rendered {
            Ok(line) => println!("{line}"),
            Err(e) => fail(&format!("serialize output: {e}")),
        }
    }
}
