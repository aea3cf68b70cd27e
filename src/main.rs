use reelfeed::RunOptions;

fn main() {
    let Some(options) = handle_cli_flags() else {
        return;
    };

    if let Err(err) = reelfeed::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Returns `None` when a flag was fully handled and the program should exit.
fn handle_cli_flags() -> Option<RunOptions> {
    let mut options = RunOptions::default();
    let mut handled = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("reelfeed {}", reelfeed::VERSION);
                handled = true;
            }
            "--help" | "-h" => {
                println!(
                    "reelfeed - A vertical, one-at-a-time video feed for the terminal.\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n  --demo               Browse bundled sample clips without an API key\n\nLogging: set REELFEED_LOG=debug (file: REELFEED_LOG_FILE)."
                );
                handled = true;
            }
            "--demo" => options.demo = true,
            other => {
                eprintln!("reelfeed: unknown argument {other:?} (see --help)");
                std::process::exit(2);
            }
        }
    }
    (!handled).then_some(options)
}
