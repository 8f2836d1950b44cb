use crate::error::{Error, Result};
use crate::object::commit::{continuation_encode, split_headers, Signature};
use crate::object::Kind;
use crate::oid::Oid;

/// an annotated tag object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// tagged object
    pub target: Oid,
    /// kind of the tagged object
    pub target_kind: Kind,
    /// tag name, without the `refs/tags/` prefix
    pub name: String,
    pub tagger: Option<Signature>,
    pub message: String,
    /// ASCII-armoured signature block
    pub signature: Option<String>,
}

impl Tag {
    pub fn new(
        target: Oid,
        target_kind: Kind,
        name: impl Into<String>,
        tagger: Signature,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target,
            target_kind,
            name: name.into(),
            tagger: Some(tagger),
            message: message.into(),
            signature: None,
        }
    }

    /// serialise to the canonical tag payload
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("object {}\n", self.target));
        out.push_str(&format!("type {}\n", self.target_kind));
        out.push_str(&format!("tag {}\n", self.name));
        if let Some(tagger) = &self.tagger {
            out.push_str(&format!("tagger {}\n", tagger.render()));
        }
        if let Some(sig) = &self.signature {
            out.push_str("gpgsig ");
            out.push_str(&continuation_encode(sig));
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    /// parse a tag payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::InvalidObject("tag payload is not utf-8".to_string()))?;
        let (headers, message) = split_headers(text)?;

        let mut target = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger = None;
        let mut signature = None;

        for (key, value) in headers {
            match key.as_str() {
                "object" => target = Some(Oid::from_hex(&value)?),
                "type" => target_kind = Some(Kind::parse(&value)?),
                "tag" => name = Some(value),
                "tagger" => tagger = Some(Signature::parse(&value)?),
                "gpgsig" => signature = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            target: target
                .ok_or_else(|| Error::InvalidObject("tag missing object header".to_string()))?,
            target_kind: target_kind
                .ok_or_else(|| Error::InvalidObject("tag missing type header".to_string()))?,
            name: name.ok_or_else(|| Error::InvalidObject("tag missing tag header".to_string()))?,
            tagger,
            message: message.to_string(),
            signature,
        })
    }
}
