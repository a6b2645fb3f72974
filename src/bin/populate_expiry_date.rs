use std::env;

use anyhow::{anyhow, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(env::args().skip(1))?;

    if let Err(e) = idverify_rust::run_populate_expiry_date(args.batch_size, args.sleep_time).await
    {
        eprintln!("populate-expiry-date fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Args {
    batch_size: Option<u32>,
    sleep_time: Option<u64>,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--batch_size" => {
                let value = args.next().ok_or_else(|| anyhow!("--batch_size missing value"))?;
                parsed.batch_size =
                    Some(value.parse().map_err(|_| anyhow!("invalid --batch_size: {value}"))?);
            }
            "--sleep_time" => {
                let value = args.next().ok_or_else(|| anyhow!("--sleep_time missing value"))?;
                parsed.sleep_time =
                    Some(value.parse().map_err(|_| anyhow!("invalid --sleep_time: {value}"))?);
            }
            _ => return Err(anyhow!("Unknown argument: {arg}")),
        }
    }

    Ok(parsed)
}
