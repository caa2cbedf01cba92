pub const MQTT_STATUS_FIELD: &str = "status=MQTTPUBLISH";

pub fn channel_publish_topic(channel_id: u32) -> String {
    format!("channels/{channel_id}/publish")
}
