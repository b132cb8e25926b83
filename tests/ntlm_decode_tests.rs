use base64::Engine;
use owa_probe::ntlm::{decode_challenge, decode_challenge_bytes, AuthenticateMessage, AvId, NtlmCredentials};
use owa_probe::Error;

fn utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn av(id: u16, value: &[u8]) -> Vec<u8> {
    let mut out = id.to_le_bytes().to_vec();
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value);
    out
}

/// Minimal Type-2 message: no target name, no version block.
fn type2(target_info: &[u8]) -> Vec<u8> {
    let mut msg = b"NTLMSSP\0".to_vec();
    msg.extend_from_slice(&2u32.to_le_bytes());
    msg.extend_from_slice(&[0, 0, 0, 0, 48, 0, 0, 0]);
    msg.extend_from_slice(&0x0089_0205u32.to_le_bytes());
    msg.extend_from_slice(b"\x11\x22\x33\x44\x55\x66\x77\x88");
    msg.extend_from_slice(&[0u8; 8]);
    msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
    msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
    msg.extend_from_slice(&48u32.to_le_bytes());
    msg.extend_from_slice(target_info);
    msg
}

fn header(raw: &[u8]) -> String {
    format!("NTLM {}", base64::engine::general_purpose::STANDARD.encode(raw))
}

#[test]
fn decodes_corp_domain() {
    let info = [av(2, &utf16("CORP")), av(4, &utf16("corp.example")), av(0, &[])].concat();
    let msg = decode_challenge(&header(&type2(&info))).unwrap();
    assert_eq!(msg.netbios_domain(), Some("CORP"));
    assert_eq!(msg.target_info.get(AvId::DnsDomainName), Some("corp.example"));
    assert_eq!(msg.server_challenge, *b"\x11\x22\x33\x44\x55\x66\x77\x88");
    assert_eq!(msg.target_name, None);
}

#[test]
fn end_marker_only_has_no_fields() {
    let msg = decode_challenge_bytes(&type2(&av(0, &[]))).unwrap();
    assert!(msg.target_info.to_map().is_empty());
    assert_eq!(msg.netbios_domain(), None);
}

#[test]
fn truncated_and_foreign_inputs_are_rejected() {
    let mut truncated = type2(&[av(2, &utf16("CORP")), av(0, &[])].concat());
    truncated.truncate(52);
    for input in [
        header(&truncated),
        "NTLM !!!not base64!!!".to_string(),
        "Negotiate abc".to_string(),
        header(b"NTLMSSP\0\x01\0\0\0"),
    ] {
        assert!(
            matches!(decode_challenge(&input), Err(Error::MalformedNtlmMessage(_))),
            "{input}"
        );
    }
}

#[test]
fn authenticate_answers_decoded_challenge() {
    let info = [av(2, &utf16("CORP")), av(0, &[])].concat();
    let challenge = decode_challenge(&header(&type2(&info))).unwrap();
    let creds = NtlmCredentials::new("CORP\\alice", "Spring2025");
    assert_eq!(creds.domain, "CORP");
    assert_eq!(creds.username, "alice");

    let msg = AuthenticateMessage::respond(&challenge, &creds).unwrap();
    let bytes = msg.as_bytes();
    assert_eq!(&bytes[..8], b"NTLMSSP\0");
    assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 3);
    assert!(msg.header_value().starts_with("NTLM "));
}
