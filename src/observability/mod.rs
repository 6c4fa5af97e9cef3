pub mod logging;
pub mod metrics;
pub mod monitor;

pub use logging::init_logging;
pub use metrics::{MetricsRegistry, init_metrics};
pub use monitor::{
	AlertKind, AlertSeverity, AlertThresholds, MonitorConfig, PerformanceAlert,
	PerformanceMonitor, RequestPerformance, WindowMetrics,
};
