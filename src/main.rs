// taillight - main.rs
//
// Headless CLI driver. Handles:
// 1. CLI argument parsing
// 2. Logging initialisation (debug mode support)
// 3. Piped-stdin collection into a temporary file
// 4. Driving each engine's scan to completion and reporting line counts
// 5. Optional merged-stream export

use clap::Parser;
use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use taillight::app::engine::LogEngine;
use taillight::app::messages::Message;
use taillight::app::watcher::Watcher;
use taillight::util;
use taillight::util::constants::MAX_MESSAGES_PER_DRAIN;

/// taillight - view, merge and index large log files.
///
/// Scans and indexes the given log files (gzip/bzip2 archives are
/// decompressed transparently), reports their line counts, and can merge
/// multiple logs into a single timestamp-ordered stream.
#[derive(Parser, Debug)]
#[command(name = "taillight", version, about)]
struct Cli {
    /// Log files to view.
    files: Vec<PathBuf>,

    /// Combine all inputs into a single timestamp-ordered view.
    #[arg(short = 'm', long = "merge")]
    merge: bool,

    /// With --merge, also write the merged stream to this path.
    #[arg(short = 'o', long = "output-merge", requires = "merge")]
    output_merge: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();
    util::logging::init(cli.debug);

    tracing::info!(
        version = util::constants::APP_VERSION,
        files = cli.files.len(),
        merge = cli.merge,
        "taillight starting"
    );

    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    let mut files = cli.files;

    // A piped stdin is collected into a temporary file and viewed like any
    // other input. The guard keeps the file alive for the process lifetime.
    let mut stdin_guard = None;
    if files.is_empty() && !std::io::stdin().is_terminal() {
        match collect_stdin() {
            Ok(temp) => {
                files.push(temp.path().to_path_buf());
                stdin_guard = Some(temp);
            }
            Err(e) => {
                eprintln!("Error: failed to read stdin: {e}");
                return 1;
            }
        }
    }

    if files.is_empty() {
        // Nothing to view and an interactive stdin: show help.
        use clap::CommandFactory;
        let _ = Cli::command().print_help();
        return 0;
    }

    sort_paths(&mut files);

    let mut watcher = Watcher::spawn_default();
    let merge = cli.merge && files.len() > 1;

    let engine_inputs: Vec<Vec<PathBuf>> = if merge {
        vec![files]
    } else {
        files.into_iter().map(|path| vec![path]).collect()
    };

    let mut viewable = 0usize;
    let mut failed = 0usize;
    for paths in engine_inputs {
        let mut engine = LogEngine::new(&paths, Some(watcher.handle()));
        match drive_scan(&mut engine) {
            Ok(()) => {
                viewable += 1;
                report(&engine);
                if let Some(out) = cli.output_merge.as_deref() {
                    if engine.merge_enabled() {
                        if let Err(e) = engine.save_merged(out) {
                            eprintln!("Error: {e}");
                            failed += 1;
                        } else {
                            println!("Saved merged stream to '{}'", out.display());
                        }
                    }
                }
            }
            Err(message) => {
                eprintln!("Error: {message}");
                failed += 1;
            }
        }
        engine.close();
    }

    watcher.close();
    drop(stdin_guard);

    if viewable == 0 || failed > 0 {
        1
    } else {
        0
    }
}

/// Drain the engine's bus until the initial scan finishes. Returns the
/// error message if the engine entered its terminal error state instead.
fn drive_scan(engine: &mut LogEngine) -> Result<(), String> {
    engine.open();
    loop {
        for envelope in engine.drain(MAX_MESSAGES_PER_DRAIN, Duration::from_millis(100)) {
            if envelope.is_stopped() {
                continue;
            }
            if let Message::FileError { error, .. } = &envelope.message {
                eprintln!("Warning: {error}");
            }
        }
        if let Some(error) = engine.error() {
            return Err(error.to_string());
        }
        if engine.scan_complete() {
            return Ok(());
        }
    }
}

fn report(engine: &LogEngine) {
    let lines = engine.line_count();
    if engine.merge_enabled() {
        let names: Vec<String> = engine
            .log_files()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        println!("{}: {lines} merged lines", names.join(" + "));
    } else {
        let file = &engine.log_files()[0];
        println!("{}: {lines} lines ({} bytes)", file.name(), file.size());
    }
}

/// Collect a piped stdin into a named temporary file.
fn collect_stdin() -> std::io::Result<tempfile::NamedTempFile> {
    let mut temp = tempfile::NamedTempFile::new()?;
    let mut stdin = std::io::stdin().lock();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = stdin.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        temp.write_all(&buffer[..n])?;
    }
    temp.flush()?;
    Ok(temp)
}

// =============================================================================
// Path ordering
// =============================================================================

/// A filename token for numeric-aware ordering: "app.2.log" sorts before
/// "app.10.log".
#[derive(Debug, PartialEq, Eq)]
enum PathToken {
    Number(u64),
    Text(String),
}

impl Ord for PathToken {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (PathToken::Number(a), PathToken::Number(b)) => a.cmp(b),
            (PathToken::Text(a), PathToken::Text(b)) => a.cmp(b),
            (PathToken::Number(a), PathToken::Text(b)) => a.to_string().cmp(b),
            (PathToken::Text(a), PathToken::Number(b)) => a.cmp(&b.to_string()),
        }
    }
}

impl PartialOrd for PathToken {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn path_tokens(path: &std::path::Path) -> Vec<PathToken> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
        .split('.')
        .map(|token| match token.parse::<u64>() {
            Ok(number) => PathToken::Number(number),
            Err(_) => PathToken::Text(token.to_lowercase()),
        })
        .collect()
}

/// Sort input paths so rotated sequences view in their natural order.
fn sort_paths(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| path_tokens(a).cmp(&path_tokens(b)));
}
