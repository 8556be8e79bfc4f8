#[tokio::main]
async fn main() {
    if let Err(e) = octscan_lib::run().await {
        eprintln!("octscan: {e}");
        std::process::exit(1);
    }
}
