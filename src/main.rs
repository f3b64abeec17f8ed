//
// main.rs
// Tricorder-rs
//
// Entry point that hands off execution to the CLI layer.
//

use tricorder::cli;

fn main() -> anyhow::Result<()> {
    cli::run()
}
