use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pubsub_core::{
    ConnectionConfig, DataStore, DataValue, NodeHandle, NodeId, NodeKind, PubSubConfiguration,
    PublisherId, StatusCode,
};
use pubsub_protocol::NetworkMessage;
use pubsub_server::{
    ApplicationConfig, MessageSink, PubSubApplication, PublishError, SinkFactory,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Demo configuration: one UDP connection with a fast and a slow writer group.
const DEMO_CONFIG: &str = r#"{
    "enabled": true,
    "connections": [{
        "name": "UADP Connection 1",
        "enabled": true,
        "transportProfileUri": "http://opcfoundation.org/UA-Profile/Transport/pubsub-udp-uadp",
        "address": "opc.udp://239.0.0.1:4840",
        "writerGroups": [
            {
                "name": "Process Values",
                "enabled": true,
                "writerGroupId": 1,
                "publishingInterval": 100,
                "datasetWriters": [{
                    "name": "Boiler Writer",
                    "enabled": true,
                    "datasetWriterId": 1,
                    "dataSetName": "Boiler",
                    "keyFrameCount": 10
                }]
            },
            {
                "name": "Diagnostics",
                "enabled": true,
                "writerGroupId": 2,
                "publishingInterval": 1000,
                "datasetWriters": [{
                    "name": "Pump Writer",
                    "enabled": true,
                    "datasetWriterId": 2,
                    "dataSetName": "Pump"
                }]
            }
        ]
    }],
    "publishedDataSets": [
        {
            "name": "Boiler",
            "fields": [
                { "fieldName": "Temperature", "publishedVariable": "ns=2;s=Boiler.Temperature" },
                { "fieldName": "Pressure", "publishedVariable": "ns=2;s=Boiler.Pressure" },
                { "fieldName": "Level", "publishedVariable": "ns=2;s=Boiler.Level" }
            ]
        },
        {
            "name": "Pump",
            "fields": [
                { "fieldName": "Speed", "publishedVariable": "ns=2;i=2001" },
                { "fieldName": "Running", "publishedVariable": "ns=2;i=2002" }
            ]
        }
    ]
}"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,pubsub_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("PubSub publisher starting...");

    // Configuration: a JSON file given as first argument, or the demo
    let mut configuration = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading configuration {path}"))?;
            serde_json::from_str::<PubSubConfiguration>(&text)
                .with_context(|| format!("parsing configuration {path}"))?
        }
        None => serde_json::from_str(DEMO_CONFIG)?,
    };
    for connection in &mut configuration.connections {
        if connection.publisher_id == PublisherId::default() {
            connection.publisher_id = PublisherId::String(uuid::Uuid::new_v4().to_string());
        }
    }

    let sinks: SinkFactory = Arc::new(|_node: NodeHandle, config: &ConnectionConfig| {
        Arc::new(LoggingSink::new(config)) as Arc<dyn MessageSink>
    });
    let app = PubSubApplication::new(configuration, ApplicationConfig::default(), sinks)
        .context("invalid PubSub configuration")?;

    // Start demo data generator
    let store = app.data_store();
    let demo_handle = tokio::spawn(async move {
        generate_demo_data(store).await;
    });

    let started = app.start();
    tracing::info!("🚀 PubSub publisher ready ({} writer groups publishing)", started);

    // Periodic statistics
    let groups = app.configurator().nodes_of_kind(NodeKind::WriterGroup);
    let mut report = tokio::time::interval(Duration::from_secs(10));
    report.tick().await;

    // Wait for shutdown signal
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = report.tick() => {
                for &group in &groups {
                    if let Some(stats) = app.publisher_stats(group) {
                        let name = app.configurator().name(group).unwrap_or_default();
                        tracing::info!(
                            writer_group = %name,
                            ticks = stats.ticks,
                            published = stats.published,
                            failures = stats.failures,
                            late = stats.late_ticks,
                            max_lateness_ms = stats.max_lateness.as_secs_f64() * 1000.0,
                            "Publisher statistics"
                        );
                    }
                }
            }
        }
    }

    demo_handle.abort();
    app.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Transport stand-in that logs every message as JSON.
struct LoggingSink {
    connection: String,
    address: String,
}

impl LoggingSink {
    fn new(config: &ConnectionConfig) -> Self {
        Self {
            connection: config.name.clone(),
            address: config.address.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

impl MessageSink for LoggingSink {
    fn send(&self, message: &NetworkMessage) -> Result<(), PublishError> {
        let json =
            serde_json::to_string(message).map_err(|e| PublishError::Encoding(e.to_string()))?;
        tracing::debug!(
            connection = %self.connection,
            address = %self.address,
            bytes = json.len(),
            "{}",
            json
        );
        Ok(())
    }
}

/// Generate demo data - a simulated boiler and feed pump
async fn generate_demo_data(store: Arc<dyn DataStore>) {
    let temperature = NodeId::string(2, "Boiler.Temperature");
    let pressure = NodeId::string(2, "Boiler.Pressure");
    let level = NodeId::string(2, "Boiler.Level");
    let speed = NodeId::numeric(2, 2001);
    let running = NodeId::numeric(2, 2002);

    let mut interval = tokio::time::interval(Duration::from_millis(250));
    let start = tokio::time::Instant::now();
    let mut level_value: f64 = 50.0;

    loop {
        interval.tick().await;
        let t = start.elapsed().as_secs_f64();

        // Temperature and pressure follow a slow oscillation
        let temp = 85.0 + (t / 10.0).sin() * 5.0;
        let bar = 2.1 + (t / 7.0).cos() * 0.2;

        // The pump runs while the level is low
        let pump_running = level_value < 60.0;
        level_value += if pump_running { 0.4 } else { -0.3 };
        let level_status = if level_value > 90.0 {
            StatusCode::UNCERTAIN
        } else {
            StatusCode::GOOD
        };

        let result = store.write_many(vec![
            (temperature.clone(), pubsub_core::attribute::VALUE, DataValue::new(temp)),
            (pressure.clone(), pubsub_core::attribute::VALUE, DataValue::new(bar)),
            (
                level.clone(),
                pubsub_core::attribute::VALUE,
                DataValue::new(level_value).with_status(level_status),
            ),
            (
                speed.clone(),
                pubsub_core::attribute::VALUE,
                DataValue::new(if pump_running { 1450 } else { 0 }),
            ),
            (running.clone(), pubsub_core::attribute::VALUE, DataValue::new(pump_running)),
        ]);

        if let Err(e) = result {
            tracing::error!("Failed to write demo values: {}", e);
            break;
        }
    }
}
