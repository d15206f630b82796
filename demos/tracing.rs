use rotalog::{LogRotatorBuilder, RotationSize, TimeZone};
use std::time::Duration;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let appender = LogRotatorBuilder::new("./logs/tracing")
        .rotation_interval(Duration::from_secs(60))
        .rotation_size(RotationSize::KiB(4))
        .time_zone(TimeZone::Local)
        .build()?;
    // One worker thread owns the rotator, so writes are serialized.
    let (non_blocking, _guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .finish()
        .try_init()?;

    for i in 1..=200 {
        tracing::info!("Log entry #{i}: enough text to roll over a few small buckets");
    }
    tracing::warn!("This is a warning message");
    tracing::error!("This is an error message");

    Ok(())
}
