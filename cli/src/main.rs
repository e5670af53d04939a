use clap::Parser;
use vetting_cli::Cli;

#[tokio::main]
async fn main() {
    vetting_cli::init_tracing();
    let code = Cli::parse().run().await;
    std::process::exit(code);
}
