mod scale_monitor;

pub use scale_monitor::ScaleMonitorTask;
