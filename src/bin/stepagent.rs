use clap::Parser;
use stepagent::app::cli::Cli;
use stepagent::app::command_handlers;

fn main() {
    let cli = Cli::parse();
    match command_handlers::run_cli(cli) {
        Ok(output) => {
            println!("{}", output.text);
            std::process::exit(output.exit_code);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
