use cambus::protocol::{Command, NodeInfo, ProtocolError, Verb, TERMINATOR, WELCOME_BANNER};

#[test]
fn test_encode_with_payload() {
    let cmd = Command::new(Verb::Rsdo, "41,2404,1");
    assert_eq!(cmd.encode(), b"rsdo,41,2404,1\r\0\n".to_vec());
}

#[test]
fn test_encode_bare_verb() {
    // No payload, no comma; just the verb and the terminator.
    let cmd = Command::bare(Verb::Quit);
    assert_eq!(cmd.encode(), b"quit\r\0\n".to_vec());
}

#[test]
fn test_encode_terminator() {
    for verb in [Verb::Boot, Verb::Info, Verb::Rsdo, Verb::Wsdo, Verb::Sync] {
        let encoded = Command::new(verb, "1").encode();
        assert!(encoded.ends_with(TERMINATOR));
    }
}

#[test]
fn test_decode_round_trip() {
    let cases = [
        Command::new(Verb::Boot, "1"),
        Command::new(Verb::Info, "2,191,cb,2001,3,04x1541"),
        Command::new(Verb::Rsdo, "41,2404,1"),
        Command::new(Verb::Wsdo, "42,6411,1,2,14000"),
        Command::new(Verb::Sync, "0"),
    ];
    for cmd in cases {
        assert_eq!(Command::decode(&cmd.encode()), Some(cmd));
    }
}

#[test]
fn test_decode_empty_payload_is_a_command() {
    // An empty payload after the comma is still a command, unlike a line
    // without any comma at all.
    let decoded = Command::decode(b"rsdo,\r\0\n");
    assert_eq!(decoded, Some(Command::bare(Verb::Rsdo)));
}

#[test]
fn test_decode_rejects_banner_and_noise() {
    assert_eq!(Command::decode(WELCOME_BANNER.as_bytes()), None);
    assert_eq!(Command::decode(b""), None);
    assert_eq!(Command::decode(b"\r\0\n"), None);
    assert_eq!(Command::decode(b"hello world\r\0\n"), None);
    // comma present but the verb is not one of ours
    assert_eq!(Command::decode(b"frob,1,2\r\0\n"), None);
}

#[test]
fn test_decode_trims_framing() {
    let decoded = Command::decode(b"  boot,2a\r\0\n").expect("valid command");
    assert_eq!(decoded.verb, Verb::Boot);
    assert_eq!(decoded.data, "2a");
}

#[test]
fn test_sdo_status_ok() {
    let reply = Command::new(Verb::Wsdo, "42,0");
    assert!(reply.sdo_status().is_ok());
}

#[test]
fn test_sdo_status_fault_carries_code() {
    let reply = Command::new(Verb::Wsdo, "42,6");
    match reply.sdo_status() {
        Err(ProtocolError::DeviceFault { node, code }) => {
            assert_eq!(node, 0x42);
            assert_eq!(code, 0x6);
        }
        other => panic!("expected device fault, got {other:?}"),
    }
}

#[test]
fn test_sdo_status_malformed_is_not_a_fault() {
    let reply = Command::new(Verb::Rsdo, "not-hex");
    assert!(matches!(
        reply.sdo_status(),
        Err(ProtocolError::MalformedPayload(_))
    ));

    let empty = Command::bare(Verb::Rsdo);
    assert!(matches!(
        empty.sdo_status(),
        Err(ProtocolError::MalformedPayload(_))
    ));
}

#[test]
fn test_sdo_status_rejects_oversized_node() {
    // a node field beyond 0xff must not be truncated into a valid id
    let reply = Command::new(Verb::Wsdo, "1ff,0");
    assert!(matches!(
        reply.sdo_status(),
        Err(ProtocolError::MalformedPayload(_))
    ));
}

#[test]
fn test_rsdo_value() {
    let reply = Command::new(Verb::Rsdo, "41,0,4000");
    assert_eq!(reply.rsdo_value().unwrap(), 0x4000);
}

#[test]
fn test_rsdo_value_requires_status_ok() {
    let reply = Command::new(Verb::Rsdo, "41,11,4000");
    assert!(matches!(
        reply.rsdo_value(),
        Err(ProtocolError::DeviceFault { code: 0x11, .. })
    ));
}

#[test]
fn test_rsdo_value_missing_field() {
    let reply = Command::new(Verb::Rsdo, "41,0");
    assert!(matches!(
        reply.rsdo_value(),
        Err(ProtocolError::MalformedPayload(_))
    ));
}

#[test]
fn test_node_info_parse() {
    let info = NodeInfo::parse("1,191,cb,2001,3,04x1541").expect("valid payload");
    assert_eq!(info.id, 0x1);
    assert_eq!(info.device, 0x191);
    assert_eq!(info.vendor, 0xcb);
    assert_eq!(info.product, 0x2001);
    assert_eq!(info.revision, 0x3);
    assert_eq!(info.serial, "04x1541");
}

#[test]
fn test_node_info_rejects_short_payload() {
    assert!(matches!(
        NodeInfo::parse("1,191,cb"),
        Err(ProtocolError::MalformedPayload(_))
    ));
    assert!(matches!(
        NodeInfo::parse(""),
        Err(ProtocolError::MalformedPayload(_))
    ));
}

#[test]
fn test_node_info_rejects_oversized_id() {
    assert!(matches!(
        NodeInfo::parse("1ff,191,cb,2001,3,04x1541"),
        Err(ProtocolError::MalformedPayload(_))
    ));
}
