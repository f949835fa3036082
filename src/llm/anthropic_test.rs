use super::*;

fn make_response(content: serde_json::Value) -> String {
    serde_json::json!({
        "id": "msg_123",
        "type": "message",
        "role": "assistant",
        "content": content,
        "model": "claude-sonnet-4-5-20250929",
        "stop_reason": "tool_use",
        "usage": { "input_tokens": 120, "output_tokens": 40 }
    })
    .to_string()
}

#[test]
fn parse_tool_use_response() {
    let json = make_response(serde_json::json!([
        {
            "type": "tool_use",
            "id": "tu_1",
            "name": "submit_recommendations",
            "input": { "recommendations": ["Open lane B"] }
        }
    ]));
    let resp = parse_response(&json).unwrap();
    assert_eq!(resp.content.len(), 1);
    assert!(
        matches!(&resp.content[0], ContentBlock::ToolUse { id, name, input }
            if id == "tu_1" && name == "submit_recommendations" && input["recommendations"][0] == "Open lane B")
    );
    assert_eq!(resp.stop_reason, "tool_use");
    assert_eq!(resp.input_tokens, 120);
    assert_eq!(resp.output_tokens, 40);
}

#[test]
fn parse_text_response() {
    let json = make_response(serde_json::json!([{ "type": "text", "text": "All clear" }]));
    let resp = parse_response(&json).unwrap();
    assert!(matches!(&resp.content[0], ContentBlock::Text { text } if text == "All clear"));
    assert_eq!(resp.model, "claude-sonnet-4-5-20250929");
}

#[test]
fn parse_drops_unknown_blocks() {
    let json = make_response(serde_json::json!([
        { "type": "thinking", "thinking": "..." },
        { "type": "text", "text": "done" }
    ]));
    let resp = parse_response(&json).unwrap();
    assert_eq!(resp.content.len(), 1);
    assert!(matches!(&resp.content[0], ContentBlock::Text { .. }));
}

#[test]
fn parse_missing_stop_reason_defaults_empty() {
    let json = serde_json::json!({
        "content": [],
        "model": "m",
        "usage": { "input_tokens": 0, "output_tokens": 0 }
    })
    .to_string();
    let resp = parse_response(&json).unwrap();
    assert_eq!(resp.stop_reason, "");
}

#[test]
fn parse_invalid_json_errors() {
    let err = parse_response("not json").unwrap_err();
    assert!(matches!(err, LlmError::ApiParse(_)));
}

#[test]
fn request_without_tools_omits_tool_fields() {
    let messages = [Message::user("hi")];
    let body = serde_json::to_value(MessagesRequest::new("m", 10, "sys", &messages, None)).unwrap();
    assert_eq!(body["system"], "sys");
    assert!(body.get("tools").is_none());
    assert!(body.get("tool_choice").is_none());
}

#[test]
fn single_tool_is_forced() {
    let messages = [Message::user("hi")];
    let tools = crate::llm::tools::guard_assistant_tools();
    let body = serde_json::to_value(MessagesRequest::new("m", 10, "sys", &messages, Some(tools.as_slice()))).unwrap();
    assert_eq!(body["tools"][0]["name"], "submit_recommendations");
    assert!(body["tools"][0].get("input_schema").is_some());
    assert_eq!(body["tool_choice"], serde_json::json!({ "type": "tool", "name": "submit_recommendations" }));
}

#[test]
fn several_tools_leave_choice_to_the_model() {
    let messages = [Message::user("hi")];
    let mut tools = crate::llm::tools::guard_assistant_tools();
    tools.push(tools[0].clone());
    tools[1].name = "other".into();
    let body = serde_json::to_value(MessagesRequest::new("m", 10, "", &messages, Some(tools.as_slice()))).unwrap();
    assert_eq!(body["tools"].as_array().map(Vec::len), Some(2));
    assert!(body.get("tool_choice").is_none());
    assert!(body.get("system").is_none());
}

#[test]
fn empty_tool_list_is_omitted() {
    let messages = [Message::user("hi")];
    let body = serde_json::to_value(MessagesRequest::new("m", 10, "sys", &messages, Some(&[]))).unwrap();
    assert!(body.get("tools").is_none());
}
