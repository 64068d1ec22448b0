//! Subscribe to an ntfy topic and answer `ping` commands.
//!
//! ```sh
//! NTFY_TOKEN=tk_... cargo run -p ntfy-subscriber --example subscribe -- <TOPIC> [SERVER]
//! ```
//!
//! Every notification is printed to stdout as one JSON line (pipe to `jq`
//! for formatting). Publish `ping a b` to the topic to see the command path.

use ntfy_subscriber::{Client, ClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let topic = args.first().ok_or("usage: subscribe <TOPIC> [SERVER]")?;
    let server = args.get(1).map_or("ntfy.sh", String::as_str);
    let token = std::env::var("NTFY_TOKEN").map_err(|_| "NTFY_TOKEN is not set")?;

    let client = Client::new(ClientConfig::new(server, topic.as_str(), token))?;

    client.registry().register_parser("print", |n| {
        println!("{}", serde_json::to_string(n)?);
        Ok(())
    });
    client.registry().register_command("ping", |args, n| {
        eprintln!("[ping] id={} args={args:?}", n.id);
        Ok(())
    });

    let stopper = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    eprintln!("subscribing to '{topic}' on {server} ...");
    client.start().await?;
    Ok(())
}
