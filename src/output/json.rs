use anyhow::Result;
use serde::Serialize;

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn renders_pretty_output() {
        let rendered = render_json(&json!({ "status": "blocked" })).unwrap();
        assert_eq!(rendered, "{\n  \"status\": \"blocked\"\n}");
    }
}
