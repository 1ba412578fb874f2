use segment_service_lib::{cli::parse_args, commands::run};

#[tokio::main]
async fn main() {
    let cli = parse_args();
    let code = run(cli).await;
    std::process::exit(code);
}
