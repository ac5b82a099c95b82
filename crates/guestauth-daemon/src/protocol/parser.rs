//! Incremental wire-protocol parser.
//!
//! Each connection owns one [`WireProtocolParser`]. Raw bytes are appended
//! to a bounded buffer; whenever a complete `<request>...</request>`
//! document is present it is cut out and run through an explicit
//! state-machine over quick-xml events. Several requests may be pipelined
//! in one read, and a document may arrive split across many reads.
//!
//! The grammar is deliberately rigid: no attributes anywhere, no CDATA,
//! comments, doctype, or processing instructions, no unknown elements, no
//! duplicate fields. Any violation is a [`ProtocolError`] and the caller
//! terminates the connection.

use bytes::BytesMut;
use guestauth_core::alias::{AliasInfo, Subject};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::error::{ProtocolError, ProtocolResult, MAX_REQUEST_SIZE};
use super::request::{
    Request, RequestBody, ELEM_ADD_ALIAS, ELEM_CONNECT, ELEM_CREATE_TICKET, ELEM_QUERY_ALIASES,
    ELEM_QUERY_MAPPED, ELEM_REMOVE_ALIAS, ELEM_REVOKE_TICKET, ELEM_SESSION, ELEM_VALIDATE_SAML,
    ELEM_VALIDATE_TICKET,
};

/// Literal close tag used as the document boundary.
///
/// Attributes are rejected by the grammar, so this byte sequence cannot
/// occur inside a legal document before the real end tag.
const REQUEST_CLOSE: &[u8] = b"</request>";

/// Scalar field elements a request body may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    UserName,
    AddMapping,
    PemCert,
    Ticket,
    Token,
    Subject,
    Comment,
}

impl Field {
    const fn element_name(self) -> &'static str {
        match self {
            Self::UserName => "userName",
            Self::AddMapping => "addMapping",
            Self::PemCert => "pemCert",
            Self::Ticket => "ticket",
            Self::Token => "token",
            Self::Subject => "subject",
            Self::Comment => "comment",
        }
    }
}

/// Parser state; together with the element name of each event this forms
/// the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the `<request>` root.
    Start,
    /// Inside `<request>`, between children.
    InRequest,
    /// Inside `<sequenceNumber>`.
    InSequence,
    /// Inside the operation element, between fields.
    InOp,
    /// Inside a scalar field of the operation element.
    InField(Field),
    /// Inside `<aliasInfo>`.
    InAliasInfo,
    /// Inside a scalar field of `<aliasInfo>`.
    InAliasField(Field),
    /// After `</request>`.
    Done,
}

/// Which scalar field, if any, `element` names inside operation `op`.
fn op_field(op: &str, element: &str) -> Option<Field> {
    let field = match (op, element) {
        (ELEM_SESSION | ELEM_QUERY_ALIASES | ELEM_CREATE_TICKET, "userName") => Field::UserName,
        (ELEM_ADD_ALIAS, "userName") => Field::UserName,
        (ELEM_ADD_ALIAS, "addMapping") => Field::AddMapping,
        (ELEM_ADD_ALIAS | ELEM_REMOVE_ALIAS, "pemCert") => Field::PemCert,
        (ELEM_REMOVE_ALIAS, "userName") => Field::UserName,
        (ELEM_REMOVE_ALIAS, "subject") => Field::Subject,
        (ELEM_VALIDATE_TICKET | ELEM_REVOKE_TICKET, "ticket") => Field::Ticket,
        (ELEM_VALIDATE_SAML, "token") => Field::Token,
        (ELEM_VALIDATE_SAML, "userName") => Field::UserName,
        _ => return None,
    };
    Some(field)
}

/// Operations whose request element carries no child fields.
const fn is_field_less_op(name: &str) -> bool {
    matches!(
        name.as_bytes(),
        b"requestConnect" | b"requestQueryMappedAliases"
    )
}

const fn is_op_element(name: &str) -> bool {
    matches!(
        name.as_bytes(),
        b"requestSession"
            | b"requestConnect"
            | b"requestAddAlias"
            | b"requestRemoveAlias"
            | b"requestQueryAliases"
            | b"requestQueryMappedAliases"
            | b"requestCreateTicket"
            | b"requestValidateTicket"
            | b"requestRevokeTicket"
            | b"requestValidateSamlBearerToken"
    )
}

/// Accumulates fields while the state machine walks one document.
#[derive(Debug, Default)]
struct RequestBuilder {
    op: Option<String>,
    sequence: Option<u64>,
    user_name: Option<String>,
    add_mapping: Option<bool>,
    pem_cert: Option<String>,
    ticket: Option<String>,
    token: Option<String>,
    subject: Option<Subject>,
    info_subject: Option<Subject>,
    info_comment: Option<String>,
    saw_alias_info: bool,
    text: String,
}

impl RequestBuilder {
    fn set_string(slot: &mut Option<String>, field: Field, value: String) -> ProtocolResult<()> {
        if slot.is_some() {
            return Err(ProtocolError::invalid(format!(
                "duplicate element {}",
                field.element_name()
            )));
        }
        *slot = Some(value);
        Ok(())
    }

    fn assign(&mut self, field: Field, value: String, in_alias_info: bool) -> ProtocolResult<()> {
        match field {
            Field::UserName => Self::set_string(&mut self.user_name, field, value),
            Field::PemCert => Self::set_string(&mut self.pem_cert, field, value),
            Field::Ticket => Self::set_string(&mut self.ticket, field, value),
            Field::Token => Self::set_string(&mut self.token, field, value),
            Field::AddMapping => {
                if self.add_mapping.is_some() {
                    return Err(ProtocolError::invalid("duplicate element addMapping"));
                }
                self.add_mapping = Some(match value.trim() {
                    "1" | "true" => true,
                    "0" | "false" => false,
                    other => {
                        return Err(ProtocolError::invalid(format!(
                            "addMapping must be a boolean, got {other:?}"
                        )))
                    },
                });
                Ok(())
            },
            Field::Subject => {
                let slot = if in_alias_info {
                    &mut self.info_subject
                } else {
                    &mut self.subject
                };
                if slot.is_some() {
                    return Err(ProtocolError::invalid("duplicate subject"));
                }
                if value.is_empty() {
                    return Err(ProtocolError::invalid("subject must not be empty"));
                }
                *slot = Some(Subject::Named(value));
                Ok(())
            },
            Field::Comment => {
                if self.info_comment.is_some() {
                    return Err(ProtocolError::invalid("duplicate element comment"));
                }
                self.info_comment = Some(value);
                Ok(())
            },
        }
    }

    fn set_any_subject(&mut self, in_alias_info: bool) -> ProtocolResult<()> {
        let slot = if in_alias_info {
            &mut self.info_subject
        } else {
            &mut self.subject
        };
        if slot.is_some() {
            return Err(ProtocolError::invalid("duplicate subject"));
        }
        *slot = Some(Subject::Any);
        Ok(())
    }

    fn require(value: Option<String>, field: &str) -> ProtocolResult<String> {
        match value {
            Some(v) if !v.is_empty() => Ok(v),
            Some(_) => Err(ProtocolError::invalid(format!("empty {field}"))),
            None => Err(ProtocolError::missing(field)),
        }
    }

    fn finish(self) -> ProtocolResult<Request> {
        let sequence_number = self
            .sequence
            .ok_or_else(|| ProtocolError::missing("sequenceNumber"))?;
        let op = self.op.ok_or_else(|| ProtocolError::missing("request body"))?;

        let body = match op.as_str() {
            ELEM_SESSION => RequestBody::SessionRequest {
                user_name: Self::require(self.user_name, "userName")?,
            },
            ELEM_CONNECT => RequestBody::Connect,
            ELEM_ADD_ALIAS => {
                if !self.saw_alias_info {
                    return Err(ProtocolError::missing("aliasInfo"));
                }
                let subject = self
                    .info_subject
                    .ok_or_else(|| ProtocolError::missing("subject"))?;
                RequestBody::AddAlias {
                    user_name: Self::require(self.user_name, "userName")?,
                    add_to_mapping: self.add_mapping.unwrap_or(false),
                    pem_cert: Self::require(self.pem_cert, "pemCert")?,
                    info: AliasInfo {
                        subject,
                        comment: self.info_comment.unwrap_or_default(),
                    },
                }
            },
            ELEM_REMOVE_ALIAS => RequestBody::RemoveAlias {
                user_name: Self::require(self.user_name, "userName")?,
                pem_cert: Self::require(self.pem_cert, "pemCert")?,
                subject: self.subject,
            },
            ELEM_QUERY_ALIASES => RequestBody::QueryAliases {
                user_name: Self::require(self.user_name, "userName")?,
            },
            ELEM_QUERY_MAPPED => RequestBody::QueryMappedAliases,
            ELEM_CREATE_TICKET => RequestBody::CreateTicket {
                user_name: Self::require(self.user_name, "userName")?,
            },
            ELEM_VALIDATE_TICKET => RequestBody::ValidateTicket {
                ticket: Self::require(self.ticket, "ticket")?,
            },
            ELEM_REVOKE_TICKET => RequestBody::RevokeTicket {
                ticket: Self::require(self.ticket, "ticket")?,
            },
            ELEM_VALIDATE_SAML => RequestBody::ValidateSamlBearerToken {
                token: Self::require(self.token, "token")?,
                user_name: self.user_name.filter(|u| !u.is_empty()),
            },
            other => {
                return Err(ProtocolError::invalid(format!(
                    "unknown request element {other}"
                )))
            },
        };

        Ok(Request {
            sequence_number,
            body,
        })
    }
}

fn element_name(start: &BytesStart<'_>) -> ProtocolResult<String> {
    if start.attributes().next().is_some() {
        return Err(ProtocolError::invalid(format!(
            "attributes are not allowed (element {})",
            String::from_utf8_lossy(start.name().as_ref())
        )));
    }
    String::from_utf8(start.name().as_ref().to_vec())
        .map_err(|_| ProtocolError::invalid("non-UTF-8 element name"))
}

/// Parse one complete `<request>` document.
fn parse_request(doc: &[u8]) -> ProtocolResult<Request> {
    let mut reader = Reader::from_reader(doc);
    reader.trim_text(false);

    let mut buf = Vec::new();
    let mut state = State::Start;
    let mut builder = RequestBuilder::default();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ProtocolError::invalid(format!("XML syntax: {e}")))?;

        state = match (state, event) {
            (State::Start, Event::Decl(_)) => State::Start,
            (_, Event::DocType(_)) => {
                return Err(ProtocolError::invalid("doctype is not allowed"));
            },
            (_, Event::PI(_)) => {
                return Err(ProtocolError::invalid("processing instructions are not allowed"));
            },
            (_, Event::CData(_)) => {
                return Err(ProtocolError::invalid("CDATA is not allowed"));
            },
            (_, Event::Comment(_)) => {
                return Err(ProtocolError::invalid("comments are not allowed"));
            },

            (State::Start, Event::Start(start)) => {
                let name = element_name(&start)?;
                if name != "request" {
                    return Err(ProtocolError::invalid(format!(
                        "expected <request>, got <{name}>"
                    )));
                }
                State::InRequest
            },

            (State::InRequest, Event::Start(start)) => {
                let name = element_name(&start)?;
                if name == "sequenceNumber" {
                    if builder.sequence.is_some() {
                        return Err(ProtocolError::invalid("duplicate sequenceNumber"));
                    }
                    builder.text.clear();
                    State::InSequence
                } else if is_op_element(&name) {
                    if builder.op.is_some() {
                        return Err(ProtocolError::invalid("multiple request bodies"));
                    }
                    builder.op = Some(name);
                    State::InOp
                } else {
                    return Err(ProtocolError::invalid(format!(
                        "unexpected element <{name}> in request"
                    )));
                }
            },
            (State::InRequest, Event::Empty(start)) => {
                let name = element_name(&start)?;
                // Field-less operations may be self-closing.
                if is_field_less_op(&name) {
                    if builder.op.is_some() {
                        return Err(ProtocolError::invalid("multiple request bodies"));
                    }
                    builder.op = Some(name);
                    State::InRequest
                } else {
                    return Err(ProtocolError::invalid(format!(
                        "unexpected element <{name}/> in request"
                    )));
                }
            },
            (State::InRequest, Event::End(_)) => State::Done,

            (State::InSequence, Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| ProtocolError::invalid(format!("bad text: {e}")))?;
                builder.text.push_str(&value);
                State::InSequence
            },
            (State::InSequence, Event::End(_)) => {
                let seq: u64 = builder
                    .text
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::invalid("sequenceNumber must be an integer"))?;
                builder.sequence = Some(seq);
                builder.text.clear();
                State::InRequest
            },

            (State::InOp, Event::Start(start)) => {
                let name = element_name(&start)?;
                let op = builder.op.as_deref().unwrap_or_default();
                if let Some(field) = op_field(op, &name) {
                    builder.text.clear();
                    State::InField(field)
                } else if op == ELEM_ADD_ALIAS && name == "aliasInfo" {
                    if builder.saw_alias_info {
                        return Err(ProtocolError::invalid("duplicate aliasInfo"));
                    }
                    builder.saw_alias_info = true;
                    State::InAliasInfo
                } else {
                    return Err(ProtocolError::invalid(format!(
                        "unexpected element <{name}> in {op}"
                    )));
                }
            },
            (State::InOp, Event::Empty(start)) => {
                let name = element_name(&start)?;
                let op = builder.op.as_deref().unwrap_or_default();
                if op == ELEM_REMOVE_ALIAS && name == "anySubject" {
                    builder.set_any_subject(false)?;
                } else if let Some(field) = op_field(op, &name) {
                    builder.assign(field, String::new(), false)?;
                } else {
                    return Err(ProtocolError::invalid(format!(
                        "unexpected element <{name}/> in {op}"
                    )));
                }
                State::InOp
            },
            (State::InOp, Event::End(_)) => State::InRequest,

            (State::InField(field), Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| ProtocolError::invalid(format!("bad text: {e}")))?;
                builder.text.push_str(&value);
                State::InField(field)
            },
            (State::InField(field), Event::End(_)) => {
                let value = std::mem::take(&mut builder.text);
                builder.assign(field, value.trim().to_string(), false)?;
                State::InOp
            },

            (State::InAliasInfo, Event::Start(start)) => {
                let name = element_name(&start)?;
                match name.as_str() {
                    "subject" => {
                        builder.text.clear();
                        State::InAliasField(Field::Subject)
                    },
                    "comment" => {
                        builder.text.clear();
                        State::InAliasField(Field::Comment)
                    },
                    other => {
                        return Err(ProtocolError::invalid(format!(
                            "unexpected element <{other}> in aliasInfo"
                        )));
                    },
                }
            },
            (State::InAliasInfo, Event::Empty(start)) => {
                let name = element_name(&start)?;
                match name.as_str() {
                    "anySubject" => builder.set_any_subject(true)?,
                    "comment" => builder.assign(Field::Comment, String::new(), true)?,
                    other => {
                        return Err(ProtocolError::invalid(format!(
                            "unexpected element <{other}/> in aliasInfo"
                        )));
                    },
                }
                State::InAliasInfo
            },
            (State::InAliasInfo, Event::End(_)) => State::InOp,

            (State::InAliasField(field), Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| ProtocolError::invalid(format!("bad text: {e}")))?;
                builder.text.push_str(&value);
                State::InAliasField(field)
            },
            (State::InAliasField(field), Event::End(_)) => {
                let value = std::mem::take(&mut builder.text);
                builder.assign(field, value.trim().to_string(), true)?;
                State::InAliasInfo
            },

            // Whitespace between elements is tolerated everywhere else.
            (state, Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| ProtocolError::invalid(format!("bad text: {e}")))?;
                if !value.trim().is_empty() {
                    return Err(ProtocolError::invalid("unexpected character data"));
                }
                state
            },

            (State::Done, Event::Eof) => break,
            (State::Done, _) => {
                return Err(ProtocolError::invalid("content after </request>"));
            },

            (_, Event::Eof) => {
                return Err(ProtocolError::invalid("truncated request document"));
            },
            (state, _) => {
                return Err(ProtocolError::invalid(format!(
                    "illegal construct in state {state:?}"
                )));
            },
        };

        buf.clear();
    }

    builder.finish()
}

/// Per-connection incremental parser.
#[derive(Debug, Default)]
pub struct WireProtocolParser {
    pending: BytesMut,
}

impl WireProtocolParser {
    /// Create an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and return every request completed by them.
    ///
    /// # Errors
    ///
    /// Any error poisons the connection; the caller must drop it without
    /// processing further input.
    pub fn feed(&mut self, input: &[u8]) -> ProtocolResult<Vec<Request>> {
        self.pending.extend_from_slice(input);

        let mut requests = Vec::new();
        while let Some(end) = find_close_tag(&self.pending) {
            let doc = self.pending.split_to(end);
            requests.push(parse_request(&doc)?);
        }

        if self.pending.len() > MAX_REQUEST_SIZE {
            return Err(ProtocolError::RequestTooLarge {
                size: self.pending.len(),
                max: MAX_REQUEST_SIZE,
            });
        }
        Ok(requests)
    }

    /// Bytes buffered waiting for a request boundary.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Offset just past the first `</request>` in `buf`, if present.
fn find_close_tag(buf: &[u8]) -> Option<usize> {
    buf.windows(REQUEST_CLOSE.len())
        .position(|w| w == REQUEST_CLOSE)
        .map(|pos| pos + REQUEST_CLOSE.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(doc: &str) -> ProtocolResult<Request> {
        let mut parser = WireProtocolParser::new();
        let mut requests = parser.feed(doc.as_bytes())?;
        assert_eq!(requests.len(), 1, "expected exactly one request");
        Ok(requests.remove(0))
    }

    #[test]
    fn parses_session_request() {
        let req = parse_one(
            "<request><sequenceNumber>7</sequenceNumber>\
             <requestSession><userName>alice</userName></requestSession></request>",
        )
        .unwrap();
        assert_eq!(req.sequence_number, 7);
        assert_eq!(
            req.body,
            RequestBody::SessionRequest {
                user_name: "alice".to_string()
            }
        );
    }

    #[test]
    fn parses_add_alias_with_named_subject() {
        let req = parse_one(
            "<request><sequenceNumber>1</sequenceNumber><requestAddAlias>\
             <userName>alice</userName><addMapping>1</addMapping>\
             <pemCert>PEM</pemCert>\
             <aliasInfo><subject>svc@corp</subject><comment>ci</comment></aliasInfo>\
             </requestAddAlias></request>",
        )
        .unwrap();
        let RequestBody::AddAlias {
            user_name,
            add_to_mapping,
            pem_cert,
            info,
        } = req.body
        else {
            panic!("wrong body");
        };
        assert_eq!(user_name, "alice");
        assert!(add_to_mapping);
        assert_eq!(pem_cert, "PEM");
        assert_eq!(info.subject, Subject::Named("svc@corp".to_string()));
        assert_eq!(info.comment, "ci");
    }

    #[test]
    fn parses_any_subject_on_empty_element_start() {
        let req = parse_one(
            "<request><sequenceNumber>2</sequenceNumber><requestAddAlias>\
             <userName>alice</userName><pemCert>PEM</pemCert>\
             <aliasInfo><anySubject/><comment/></aliasInfo>\
             </requestAddAlias></request>",
        )
        .unwrap();
        let RequestBody::AddAlias { info, add_to_mapping, .. } = req.body else {
            panic!("wrong body");
        };
        assert_eq!(info.subject, Subject::Any);
        assert_eq!(info.comment, "");
        assert!(!add_to_mapping);
    }

    #[test]
    fn parses_remove_alias_without_subject() {
        let req = parse_one(
            "<request><sequenceNumber>3</sequenceNumber><requestRemoveAlias>\
             <userName>bob</userName><pemCert>PEM</pemCert>\
             </requestRemoveAlias></request>",
        )
        .unwrap();
        assert_eq!(
            req.body,
            RequestBody::RemoveAlias {
                user_name: "bob".to_string(),
                pem_cert: "PEM".to_string(),
                subject: None,
            }
        );
    }

    #[test]
    fn parses_field_less_operations_self_closing() {
        let req = parse_one(
            "<request><sequenceNumber>4</sequenceNumber><requestQueryMappedAliases/></request>",
        )
        .unwrap();
        assert_eq!(req.body, RequestBody::QueryMappedAliases);

        let req = parse_one(
            "<request><sequenceNumber>5</sequenceNumber><requestConnect></requestConnect></request>",
        )
        .unwrap();
        assert_eq!(req.body, RequestBody::Connect);
    }

    #[test]
    fn parses_saml_request_with_optional_user() {
        let req = parse_one(
            "<request><sequenceNumber>6</sequenceNumber><requestValidateSamlBearerToken>\
             <token>TOK</token></requestValidateSamlBearerToken></request>",
        )
        .unwrap();
        assert_eq!(
            req.body,
            RequestBody::ValidateSamlBearerToken {
                token: "TOK".to_string(),
                user_name: None,
            }
        );
    }

    #[test]
    fn pipelined_requests_in_one_read() {
        let mut parser = WireProtocolParser::new();
        let requests = parser
            .feed(
                b"<request><sequenceNumber>1</sequenceNumber><requestConnect/></request>\
                  <request><sequenceNumber>2</sequenceNumber><requestConnect/></request>",
            )
            .unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].sequence_number, 1);
        assert_eq!(requests[1].sequence_number, 2);
    }

    #[test]
    fn request_split_across_reads() {
        let mut parser = WireProtocolParser::new();
        let doc = b"<request><sequenceNumber>9</sequenceNumber><requestQueryAliases>\
                    <userName>alice</userName></requestQueryAliases></request>";
        let (a, b) = doc.split_at(30);
        assert!(parser.feed(a).unwrap().is_empty());
        let requests = parser.feed(b).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].sequence_number, 9);
    }

    #[test]
    fn oversize_pending_buffer_is_rejected() {
        let mut parser = WireProtocolParser::new();
        let big = vec![b'a'; MAX_REQUEST_SIZE + 1];
        let err = parser.feed(&big).unwrap_err();
        assert!(matches!(err, ProtocolError::RequestTooLarge { .. }));
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let err = parse_one(
            "<request><sequenceNumber>1</sequenceNumber><requestQueryAliases>\
             <userName>a</userName><userName>b</userName></requestQueryAliases></request>",
        )
        .unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn unknown_element_is_rejected() {
        let err = parse_one(
            "<request><sequenceNumber>1</sequenceNumber><requestQueryAliases>\
             <shoeSize>44</shoeSize></requestQueryAliases></request>",
        )
        .unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn attributes_are_rejected() {
        let err = parse_one(
            "<request id=\"1\"><sequenceNumber>1</sequenceNumber><requestConnect/></request>",
        )
        .unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn cdata_and_comments_are_rejected() {
        assert!(parse_one(
            "<request><sequenceNumber>1</sequenceNumber><requestValidateTicket>\
             <ticket><![CDATA[x]]></ticket></requestValidateTicket></request>",
        )
        .is_err());
        assert!(parse_one(
            "<request><!-- hi --><sequenceNumber>1</sequenceNumber><requestConnect/></request>",
        )
        .is_err());
    }

    #[test]
    fn missing_sequence_number_is_rejected() {
        let err = parse_one("<request><requestConnect/></request>").unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { .. }));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let err = parse_one(
            "<request><sequenceNumber>1</sequenceNumber>\
             <requestCreateTicket></requestCreateTicket></request>",
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { .. }));
    }

    #[test]
    fn whitespace_between_elements_is_tolerated() {
        let req = parse_one(
            "<request>\n  <sequenceNumber>1</sequenceNumber>\n  <requestConnect/>\n</request>",
        )
        .unwrap();
        assert_eq!(req.body, RequestBody::Connect);
    }
}
