//! Fly command - moves one crow and prints where it landed.

use flock::{EntityOptions, Relay};
use serde_json::{Map, Value};

use super::{connect, sync_crow};
use crate::{cli::FlyArgs, model::CROW};

/// Run the fly command
pub async fn run(args: &FlyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (runtime, relay) = connect(&args.client).await?;

    let mut options = EntityOptions::default();
    if let Some(author) = &args.author {
        options = options.author(author.as_str());
    }
    let crow = runtime.entity_with(CROW, &args.client.id, options)?;
    sync_crow(&crow).await?;

    let mut params = Map::new();
    if let Some(x) = args.x {
        params.insert("x".to_string(), x.into());
    }
    if let Some(y) = args.y {
        params.insert("y".to_string(), y.into());
    }
    crow.call("fly", Value::Object(params)).await?;

    println!("{}", serde_json::to_string_pretty(&crow.state())?);
    relay.close().await?;
    Ok(())
}
