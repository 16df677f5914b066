use std::env;
use std::time::Duration;

use tuya_cloud_climate::{ClimateConfig, ClimateEntity, CloudClient, Coordinator, Region};

#[tokio::main]
async fn main() -> tuya_cloud_climate::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("usage: monitor <access_id> <access_secret> <device_id> [region]");
        std::process::exit(2);
    }
    let region = Region::from_code(args.get(4).map(String::as_str).unwrap_or("us"));

    let client = CloudClient::builder(&args[1], &args[2])
        .region(region)
        .build()?;

    let coordinator = Coordinator::builder(client, &args[3])
        .interval(Duration::from_secs(15))
        .on_event(|event| {
            println!("{event:?}");
        })
        .build();

    println!("Polling {} via {}...", args[3], region.endpoint());
    coordinator.refresh().await?;

    let entity = ClimateEntity::new(coordinator.clone(), ClimateConfig::default());
    if let Err(e) = entity.load_capabilities().await {
        eprintln!("Capabilities unavailable: {e}");
    }
    coordinator.start();

    loop {
        println!(
            "[{}] current: {:?} | target: {:?} | mode: {:?} | action: {:?}{}",
            entity.name(),
            entity.current_temperature(),
            entity.target_temperature(),
            entity.hvac_mode(),
            entity.hvac_action(),
            if entity.available() { "" } else { " | UNAVAILABLE" },
        );
        tokio::time::sleep(Duration::from_secs(15)).await;
    }
}
