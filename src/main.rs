//! VM image fetcher command line entry point

use std::error::Error;
use std::process;
use vm_image_fetcher::Logger;
use vm_image_fetcher::cli::{Args, Runner};

#[tokio::main]
async fn main() {
    let args = Args::parse_args();

    let runner = match Runner::new(args) {
        Ok(runner) => runner,
        Err(e) => {
            Logger::default().error(&e.to_string());
            process::exit(2);
        }
    };

    if let Err(e) = runner.run().await {
        Logger::default().error(&e.to_string());
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("   caused by: {}", cause);
            source = cause.source();
        }
        process::exit(1);
    }
}
