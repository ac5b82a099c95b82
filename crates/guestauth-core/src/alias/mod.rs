//! Alias and mapping data model plus the persisted XML codec.
//!
//! A per-user alias file records which certificates may authenticate as
//! that user, each with one or more subjects. The single global mapping
//! file links (certificate, subject) pairs to user names so identity can be
//! resolved when a client supplies none.
//!
//! File shapes:
//!
//! ```text
//! <userAliases>              <mappedAliases>
//!   <alias>                    <mappedAlias>
//!     <pemCert>..</pemCert>      <userName>..</userName>
//!     <aliasInfo>                <pemCert>..</pemCert>
//!       <subject>..</subject>    <subject>..</subject>
//!       <comment>..</comment>    <anySubject/>
//!     </aliasInfo>             </mappedAlias>
//!   </alias>                 </mappedAliases>
//! </userAliases>
//! ```

pub mod store;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{ServiceError, ServiceResult};

/// A SAML subject an alias accepts: a specific NameID or the wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// A specific SAML NameID value.
    Named(String),
    /// The wildcard subject: accepts any NameID.
    Any,
}

impl Subject {
    /// Store equality: types must match, names compare case-insensitively.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, Self::Any) => true,
            (Self::Named(a), Self::Named(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => false,
        }
    }

    /// Trust matching: does this *registered* subject accept `target`?
    ///
    /// The wildcard accepts anything; a named subject accepts only an equal
    /// name.
    #[must_use]
    pub fn accepts(&self, target: &Self) -> bool {
        matches!(self, Self::Any) || self.same(target)
    }

    /// The subject name, if named.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(n) => Some(n),
            Self::Any => None,
        }
    }
}

/// A subject/comment pair registered on an alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasInfo {
    /// The subject this alias entry accepts.
    pub subject: Subject,
    /// Human-readable comment recorded at registration time.
    pub comment: String,
}

/// A certificate registered as able to authenticate as one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// PEM text of the certificate. Compared by decoded DER, never as text.
    pub pem_cert: String,
    /// Registered subjects. Never empty in a persisted store.
    pub infos: Vec<AliasInfo>,
}

/// A global (certificate, subjects) → user link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedAlias {
    /// PEM text of the certificate.
    pub pem_cert: String,
    /// User whose alias store is consulted for this certificate.
    pub user_name: String,
    /// Subjects this mapping covers. Never empty in a persisted store.
    pub subjects: Vec<Subject>,
}

/// Name of the global mapping file inside the store directory.
pub const MAPPING_FILE_NAME: &str = "mapping.xml";

const ALIAS_FILE_PREFIX: &str = "user-";
const ALIAS_FILE_SUFFIX: &str = ".xml";

/// Encode a user name for use inside an alias file name.
///
/// Bytes outside `[A-Za-z0-9_.-]` become `%XX` (uppercase hex) so arbitrary
/// account names map to safe, reversible file names.
#[must_use]
pub fn encode_username(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-' => {
                out.push(char::from(b));
            },
            other => {
                out.push('%');
                out.push_str(&format!("{other:02X}"));
            },
        }
    }
    out
}

/// Decode a user name encoded by [`encode_username`].
#[must_use]
pub fn decode_username(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// File name of a user's alias file.
#[must_use]
pub fn alias_file_name(user: &str) -> String {
    format!("{ALIAS_FILE_PREFIX}{}{ALIAS_FILE_SUFFIX}", encode_username(user))
}

/// Recover the user name from an alias file name, if it is one.
#[must_use]
pub fn user_from_alias_file_name(file_name: &str) -> Option<String> {
    let encoded = file_name
        .strip_prefix(ALIAS_FILE_PREFIX)?
        .strip_suffix(ALIAS_FILE_SUFFIX)?;
    decode_username(encoded)
}

// ============================================================================
// XML codec
// ============================================================================

fn codec_err(context: &str, detail: impl std::fmt::Display) -> ServiceError {
    ServiceError::internal(format!("malformed {context}: {detail}"))
}

/// Read the text content of the current element up to its end tag.
fn read_text(
    reader: &mut Reader<&[u8]>,
    end: &[u8],
    context: &str,
) -> ServiceResult<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| codec_err(context, e))?
        {
            Event::Text(t) => {
                text.push_str(&t.unescape().map_err(|e| codec_err(context, e))?);
            },
            Event::End(e) if e.name().as_ref() == end => return Ok(text),
            other => {
                return Err(codec_err(
                    context,
                    format!("unexpected content {other:?}"),
                ))
            },
        }
    }
}

fn parse_alias_info(reader: &mut Reader<&[u8]>) -> ServiceResult<AliasInfo> {
    const CTX: &str = "aliasInfo element";
    let mut buf = Vec::new();
    let mut subject: Option<Subject> = None;
    let mut comment = String::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| codec_err(CTX, e))? {
            Event::Start(e) => match e.name().as_ref() {
                b"subject" => {
                    subject = Some(Subject::Named(read_text(reader, b"subject", CTX)?));
                },
                b"anySubject" => {
                    read_text(reader, b"anySubject", CTX)?;
                    subject = Some(Subject::Any);
                },
                b"comment" => comment = read_text(reader, b"comment", CTX)?,
                other => {
                    return Err(codec_err(
                        CTX,
                        format!("unexpected element {}", String::from_utf8_lossy(other)),
                    ))
                },
            },
            Event::Empty(e) if e.name().as_ref() == b"anySubject" => {
                subject = Some(Subject::Any);
            },
            Event::End(e) if e.name().as_ref() == b"aliasInfo" => break,
            other => return Err(codec_err(CTX, format!("unexpected content {other:?}"))),
        }
        buf.clear();
    }
    let subject = subject.ok_or_else(|| codec_err(CTX, "missing subject"))?;
    Ok(AliasInfo { subject, comment })
}

fn parse_alias(reader: &mut Reader<&[u8]>) -> ServiceResult<Alias> {
    const CTX: &str = "alias element";
    let mut buf = Vec::new();
    let mut pem_cert: Option<String> = None;
    let mut infos = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| codec_err(CTX, e))? {
            Event::Start(e) => match e.name().as_ref() {
                b"pemCert" => pem_cert = Some(read_text(reader, b"pemCert", CTX)?),
                b"aliasInfo" => infos.push(parse_alias_info(reader)?),
                other => {
                    return Err(codec_err(
                        CTX,
                        format!("unexpected element {}", String::from_utf8_lossy(other)),
                    ))
                },
            },
            Event::End(e) if e.name().as_ref() == b"alias" => break,
            other => return Err(codec_err(CTX, format!("unexpected content {other:?}"))),
        }
        buf.clear();
    }
    let pem_cert = pem_cert.ok_or_else(|| codec_err(CTX, "missing pemCert"))?;
    if infos.is_empty() {
        return Err(codec_err(CTX, "alias with no subjects"));
    }
    Ok(Alias { pem_cert, infos })
}

/// Parse a per-user alias file.
///
/// # Errors
///
/// Returns [`ServiceError::InternalFailure`] on malformed content.
pub fn parse_user_aliases(bytes: &[u8]) -> ServiceResult<Vec<Alias>> {
    const CTX: &str = "alias file";
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut aliases = Vec::new();
    let mut seen_root = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| codec_err(CTX, e))? {
            Event::Decl(_) => {},
            Event::Start(e) if e.name().as_ref() == b"userAliases" && !seen_root => {
                seen_root = true;
            },
            Event::Start(e) if e.name().as_ref() == b"alias" && seen_root => {
                aliases.push(parse_alias(&mut reader)?);
            },
            Event::End(e) if e.name().as_ref() == b"userAliases" => {},
            Event::Eof => break,
            other => return Err(codec_err(CTX, format!("unexpected content {other:?}"))),
        }
        buf.clear();
    }
    if !seen_root {
        return Err(codec_err(CTX, "missing userAliases root"));
    }
    Ok(aliases)
}

fn parse_mapped_alias(reader: &mut Reader<&[u8]>) -> ServiceResult<MappedAlias> {
    const CTX: &str = "mappedAlias element";
    let mut buf = Vec::new();
    let mut pem_cert: Option<String> = None;
    let mut user_name: Option<String> = None;
    let mut subjects = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| codec_err(CTX, e))? {
            Event::Start(e) => match e.name().as_ref() {
                b"pemCert" => pem_cert = Some(read_text(reader, b"pemCert", CTX)?),
                b"userName" => user_name = Some(read_text(reader, b"userName", CTX)?),
                b"subject" => subjects.push(Subject::Named(read_text(reader, b"subject", CTX)?)),
                b"anySubject" => {
                    read_text(reader, b"anySubject", CTX)?;
                    subjects.push(Subject::Any);
                },
                other => {
                    return Err(codec_err(
                        CTX,
                        format!("unexpected element {}", String::from_utf8_lossy(other)),
                    ))
                },
            },
            Event::Empty(e) if e.name().as_ref() == b"anySubject" => subjects.push(Subject::Any),
            Event::End(e) if e.name().as_ref() == b"mappedAlias" => break,
            other => return Err(codec_err(CTX, format!("unexpected content {other:?}"))),
        }
        buf.clear();
    }
    let pem_cert = pem_cert.ok_or_else(|| codec_err(CTX, "missing pemCert"))?;
    let user_name = user_name.ok_or_else(|| codec_err(CTX, "missing userName"))?;
    if subjects.is_empty() {
        return Err(codec_err(CTX, "mapping with no subjects"));
    }
    Ok(MappedAlias {
        pem_cert,
        user_name,
        subjects,
    })
}

/// Parse the global mapping file.
///
/// # Errors
///
/// Returns [`ServiceError::InternalFailure`] on malformed content.
pub fn parse_mapping(bytes: &[u8]) -> ServiceResult<Vec<MappedAlias>> {
    const CTX: &str = "mapping file";
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut mappings = Vec::new();
    let mut seen_root = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| codec_err(CTX, e))? {
            Event::Decl(_) => {},
            Event::Start(e) if e.name().as_ref() == b"mappedAliases" && !seen_root => {
                seen_root = true;
            },
            Event::Start(e) if e.name().as_ref() == b"mappedAlias" && seen_root => {
                mappings.push(parse_mapped_alias(&mut reader)?);
            },
            Event::End(e) if e.name().as_ref() == b"mappedAliases" => {},
            Event::Eof => break,
            other => return Err(codec_err(CTX, format!("unexpected content {other:?}"))),
        }
        buf.clear();
    }
    if !seen_root {
        return Err(codec_err(CTX, "missing mappedAliases root"));
    }
    Ok(mappings)
}

fn write_simple(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) {
    // Writing into a Vec cannot fail.
    let _ = writer.write_event(Event::Start(BytesStart::new(tag)));
    let _ = writer.write_event(Event::Text(BytesText::new(text)));
    let _ = writer.write_event(Event::End(BytesEnd::new(tag)));
}

fn write_subject(writer: &mut Writer<Vec<u8>>, subject: &Subject) {
    match subject {
        Subject::Named(name) => write_simple(writer, "subject", name),
        Subject::Any => {
            let _ = writer.write_event(Event::Empty(BytesStart::new("anySubject")));
        },
    }
}

/// Serialize a per-user alias list. Empty input yields empty bytes, which
/// the store layer turns into a file deletion.
#[must_use]
pub fn write_user_aliases(aliases: &[Alias]) -> Vec<u8> {
    if aliases.is_empty() {
        return Vec::new();
    }
    let mut writer = Writer::new(Vec::new());
    let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));
    let _ = writer.write_event(Event::Start(BytesStart::new("userAliases")));
    for alias in aliases {
        let _ = writer.write_event(Event::Start(BytesStart::new("alias")));
        write_simple(&mut writer, "pemCert", &alias.pem_cert);
        for info in &alias.infos {
            let _ = writer.write_event(Event::Start(BytesStart::new("aliasInfo")));
            write_subject(&mut writer, &info.subject);
            write_simple(&mut writer, "comment", &info.comment);
            let _ = writer.write_event(Event::End(BytesEnd::new("aliasInfo")));
        }
        let _ = writer.write_event(Event::End(BytesEnd::new("alias")));
    }
    let _ = writer.write_event(Event::End(BytesEnd::new("userAliases")));
    writer.into_inner()
}

/// Serialize the global mapping list. Empty input yields empty bytes.
#[must_use]
pub fn write_mapping(mappings: &[MappedAlias]) -> Vec<u8> {
    if mappings.is_empty() {
        return Vec::new();
    }
    let mut writer = Writer::new(Vec::new());
    let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));
    let _ = writer.write_event(Event::Start(BytesStart::new("mappedAliases")));
    for mapping in mappings {
        let _ = writer.write_event(Event::Start(BytesStart::new("mappedAlias")));
        write_simple(&mut writer, "userName", &mapping.user_name);
        write_simple(&mut writer, "pemCert", &mapping.pem_cert);
        for subject in &mapping.subjects {
            write_subject(&mut writer, subject);
        }
        let _ = writer.write_event(Event::End(BytesEnd::new("mappedAlias")));
    }
    let _ = writer.write_event(Event::End(BytesEnd::new("mappedAliases")));
    writer.into_inner()
}
