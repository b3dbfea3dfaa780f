//! Test data builders for creating test objects

use serialbench_rs::config::AppConfig;
use serialbench_rs::DeviceProperties;

/// Builder for configs with timings short enough for tests
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.connection.read_poll_interval_ms = 1;
        config.pipeline.idle_tick_ms = 10;
        config.auto_send.interval_ms = 5;
        config.discovery.poll_interval_ms = 10;
        Self { config }
    }

    pub fn auto_send_interval_ms(mut self, ms: u64) -> Self {
        self.config.auto_send.interval_ms = ms;
        self
    }

    pub fn discovery_interval_ms(mut self, ms: u64) -> Self {
        self.config.discovery.poll_interval_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.pipeline.event_channel_capacity = capacity;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for identification lines
pub struct IdentLineBuilder {
    fields: [String; 6],
}

impl IdentLineBuilder {
    pub fn new() -> Self {
        Self {
            fields: [
                "Acme".to_string(),
                "Widget".to_string(),
                "X1".to_string(),
                "2024-01".to_string(),
                "PID9".to_string(),
                "1.2.0".to_string(),
            ],
        }
    }

    pub fn product_id(mut self, id: &str) -> Self {
        self.fields[4] = id.to_string();
        self
    }

    pub fn company(mut self, name: &str) -> Self {
        self.fields[0] = name.to_string();
        self
    }

    /// The six fields joined, without a terminator
    pub fn fields_line(&self) -> String {
        self.fields.join(";")
    }

    /// The line as a device would send it, with CRLF
    pub fn line(&self) -> String {
        format!("{}\r\n", self.fields_line())
    }

    pub fn properties(&self) -> DeviceProperties {
        DeviceProperties {
            company_name: self.fields[0].clone(),
            product_name: self.fields[1].clone(),
            product_model: self.fields[2].clone(),
            manufacture_date: self.fields[3].clone(),
            product_id: self.fields[4].clone(),
            firmware_version: self.fields[5].clone(),
        }
    }
}

impl Default for IdentLineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_line_builder() {
        let builder = IdentLineBuilder::new().product_id("PID1");
        assert_eq!(builder.line(), "Acme;Widget;X1;2024-01;PID1;1.2.0\r\n");
        assert_eq!(builder.properties().product_id, "PID1");
    }
}
