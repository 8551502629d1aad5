use adjustment_sync_lib::{cli::parse_args, commands::run_worker};

#[tokio::main]
async fn main() {
    let cli = parse_args();
    std::process::exit(run_worker(cli).await);
}
