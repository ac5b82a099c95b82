//! Reply serialization.
//!
//! Every request gets exactly one `<reply>` carrying the echoed sequence
//! number and either a payload or an `errorCode`/`errorMsg` pair. Error
//! codes and messages come from
//! [`ServiceError::wire_code`]/[`ServiceError::wire_message`], which keep
//! authentication failures deliberately uninformative.

use guestauth_core::alias::{Alias, MappedAlias, Subject};
use guestauth_core::error::ServiceError;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

/// Successful reply payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPayload {
    /// Acknowledgement with no payload.
    Ok,
    /// Path of the per-user session socket.
    SessionSocket {
        /// Absolute socket path the client should reconnect to.
        path: String,
    },
    /// A user's registered aliases.
    Aliases {
        /// The alias entries.
        aliases: Vec<Alias>,
    },
    /// The global mapping entries.
    MappedAliases {
        /// The mapping entries.
        mappings: Vec<MappedAlias>,
    },
    /// A freshly minted ticket.
    Ticket {
        /// The opaque ticket value.
        ticket: String,
    },
    /// The identity a ticket resolves to.
    UserName {
        /// The account name.
        user_name: String,
    },
    /// Outcome of a SAML bearer authentication.
    SamlResult {
        /// The authenticated account.
        user_name: String,
        /// The SAML subject the token asserted.
        subject_name: String,
    },
}

fn write_simple(writer: &mut Writer<Vec<u8>>, name: &str, value: &str) {
    let _ = writer.write_event(Event::Start(BytesStart::new(name)));
    let _ = writer.write_event(Event::Text(BytesText::new(value)));
    let _ = writer.write_event(Event::End(BytesEnd::new(name)));
}

fn write_subject(writer: &mut Writer<Vec<u8>>, subject: &Subject) {
    match subject {
        Subject::Named(name) => write_simple(writer, "subject", name),
        Subject::Any => {
            let _ = writer.write_event(Event::Empty(BytesStart::new("anySubject")));
        },
    }
}

fn write_payload(writer: &mut Writer<Vec<u8>>, payload: &ReplyPayload) {
    match payload {
        ReplyPayload::Ok => {},
        ReplyPayload::SessionSocket { path } => write_simple(writer, "socketPath", path),
        ReplyPayload::Aliases { aliases } => {
            let _ = writer.write_event(Event::Start(BytesStart::new("aliases")));
            for alias in aliases {
                let _ = writer.write_event(Event::Start(BytesStart::new("alias")));
                write_simple(writer, "pemCert", &alias.pem_cert);
                for info in &alias.infos {
                    let _ = writer.write_event(Event::Start(BytesStart::new("aliasInfo")));
                    write_subject(writer, &info.subject);
                    write_simple(writer, "comment", &info.comment);
                    let _ = writer.write_event(Event::End(BytesEnd::new("aliasInfo")));
                }
                let _ = writer.write_event(Event::End(BytesEnd::new("alias")));
            }
            let _ = writer.write_event(Event::End(BytesEnd::new("aliases")));
        },
        ReplyPayload::MappedAliases { mappings } => {
            let _ = writer.write_event(Event::Start(BytesStart::new("mappedAliases")));
            for mapping in mappings {
                let _ = writer.write_event(Event::Start(BytesStart::new("mappedAlias")));
                write_simple(writer, "userName", &mapping.user_name);
                write_simple(writer, "pemCert", &mapping.pem_cert);
                for subject in &mapping.subjects {
                    write_subject(writer, subject);
                }
                let _ = writer.write_event(Event::End(BytesEnd::new("mappedAlias")));
            }
            let _ = writer.write_event(Event::End(BytesEnd::new("mappedAliases")));
        },
        ReplyPayload::Ticket { ticket } => write_simple(writer, "ticket", ticket),
        ReplyPayload::UserName { user_name } => write_simple(writer, "userName", user_name),
        ReplyPayload::SamlResult {
            user_name,
            subject_name,
        } => {
            write_simple(writer, "userName", user_name);
            write_simple(writer, "samlSubject", subject_name);
        },
    }
}

/// Serialize one reply document.
#[must_use]
pub fn encode_reply(sequence_number: u64, result: &Result<ReplyPayload, ServiceError>) -> Vec<u8> {
    let mut writer = Writer::new(Vec::new());
    let _ = writer.write_event(Event::Start(BytesStart::new("reply")));
    write_simple(&mut writer, "sequenceNumber", &sequence_number.to_string());
    match result {
        Ok(payload) => write_payload(&mut writer, payload),
        Err(error) => {
            write_simple(&mut writer, "errorCode", &error.wire_code().to_string());
            write_simple(&mut writer, "errorMsg", &error.wire_message());
        },
    }
    let _ = writer.write_event(Event::End(BytesEnd::new("reply")));
    writer.into_inner()
}

#[cfg(test)]
mod tests {
    use guestauth_core::alias::AliasInfo;

    use super::*;

    #[test]
    fn encodes_ok_reply() {
        let out = encode_reply(4, &Ok(ReplyPayload::Ok));
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "<reply><sequenceNumber>4</sequenceNumber></reply>"
        );
    }

    #[test]
    fn encodes_error_reply_with_wire_code() {
        let out = encode_reply(9, &Err(ServiceError::AuthenticationDenied));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("<sequenceNumber>9</sequenceNumber>"));
        assert!(text.contains(&format!(
            "<errorCode>{}</errorCode>",
            ServiceError::AuthenticationDenied.wire_code()
        )));
        assert!(text.contains("<errorMsg>"));
    }

    #[test]
    fn encodes_alias_list_with_escaping() {
        let payload = ReplyPayload::Aliases {
            aliases: vec![Alias {
                pem_cert: "PEM".to_string(),
                infos: vec![AliasInfo {
                    subject: Subject::Any,
                    comment: "a <b> & c".to_string(),
                }],
            }],
        };
        let text = String::from_utf8(encode_reply(1, &Ok(payload))).unwrap();
        assert!(text.contains("<anySubject/>"));
        assert!(text.contains("a &lt;b&gt; &amp; c"));
    }

    #[test]
    fn encodes_saml_result() {
        let payload = ReplyPayload::SamlResult {
            user_name: "alice".to_string(),
            subject_name: "alice@corp.test".to_string(),
        };
        let text = String::from_utf8(encode_reply(2, &Ok(payload))).unwrap();
        assert!(text.contains("<userName>alice</userName>"));
        assert!(text.contains("<samlSubject>alice@corp.test</samlSubject>"));
    }
}
