use serde::{Deserialize, Serialize};

/// One broker traffic sample as delivered by the producer.
///
/// `traffic_usage` is the classification attribute. It is signed so that
/// out-of-range inputs (including negatives) survive decoding and can be
/// reported as unclassified instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub user_name: String,
    pub id: i64,
    pub traffic_usage: i64,
    pub ip: String,
    pub port: String,
    #[serde(default)]
    pub mac: String,
}

impl Record {
    pub fn new(
        user_name: impl Into<String>,
        id: i64,
        traffic_usage: i64,
        ip: impl Into<String>,
        port: impl Into<String>,
        mac: impl Into<String>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            id,
            traffic_usage,
            ip: ip.into(),
            port: port.into(),
            mac: mac.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_line_with_documented_field_names() {
        let line = r#"{"user_name":"ali","id":7,"traffic_usage":120,"ip":"10.0.0.1","port":"8080","mac":"aa:bb"}"#;
        let record: Record = serde_json::from_str(line).unwrap();
        assert_eq!(
            record,
            Record::new("ali", 7, 120, "10.0.0.1", "8080", "aa:bb")
        );
    }

    #[test]
    fn missing_mac_defaults_to_empty() {
        let line = r#"{"user_name":"ali","id":7,"traffic_usage":-3,"ip":"10.0.0.1","port":"8080"}"#;
        let record: Record = serde_json::from_str(line).unwrap();
        assert_eq!(record.mac, "");
        assert_eq!(record.traffic_usage, -3);
    }
}
