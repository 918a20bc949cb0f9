use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct RuntimeMetrics {
    pub records_created: IntCounter,
    pub records_deleted: IntCounter,
    pub placeholders_resolved: IntCounter,
    pub parse_failures: IntCounter,
    pub motor_moves: IntCounter,
    pub records_loaded: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub runtime: RuntimeMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let records_created = counter("rt_records_created", "Records created from descriptions")?;
        let records_deleted = counter("rt_records_deleted", "Records deleted")?;
        let placeholders_resolved = counter(
            "rt_placeholders_resolved",
            "Forward references resolved by placeholder fixup",
        )?;
        let parse_failures = counter("rt_parse_failures", "Descriptions that failed to parse")?;
        let motor_moves = counter("rt_motor_moves", "Motor move commands issued")?;
        let records_loaded = IntGauge::new("rt_records_loaded", "Records currently in the list")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let runtime = RuntimeMetrics {
            records_created,
            records_deleted,
            placeholders_resolved,
            parse_failures,
            motor_moves,
            records_loaded,
        };
        let _ = registry.register(Box::new(runtime.records_created.clone()));
        let _ = registry.register(Box::new(runtime.records_deleted.clone()));
        let _ = registry.register(Box::new(runtime.placeholders_resolved.clone()));
        let _ = registry.register(Box::new(runtime.parse_failures.clone()));
        let _ = registry.register(Box::new(runtime.motor_moves.clone()));
        let _ = registry.register(Box::new(runtime.records_loaded.clone()));
        Ok(Self { registry, runtime })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
