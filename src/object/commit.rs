use crate::error::{Error, Result};
use crate::oid::Oid;

/// author or committer identity with timestamp
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// unix seconds
    pub when: i64,
    /// timezone offset in minutes east of UTC
    pub tz_offset: i32,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: i64, tz_offset: i32) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when,
            tz_offset,
        }
    }

    /// render as `name <email> seconds offset`
    pub fn render(&self) -> String {
        let sign = if self.tz_offset < 0 { '-' } else { '+' };
        let abs = self.tz_offset.unsigned_abs();
        format!(
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.when,
            sign,
            abs / 60,
            abs % 60
        )
    }

    /// parse a rendered signature line value
    pub fn parse(value: &str) -> Result<Self> {
        let open = value
            .find('<')
            .ok_or_else(|| Error::InvalidObject(format!("signature missing '<': {value}")))?;
        let close = value
            .find('>')
            .ok_or_else(|| Error::InvalidObject(format!("signature missing '>': {value}")))?;
        if close < open {
            return Err(Error::InvalidObject(format!("malformed signature: {value}")));
        }

        let name = value[..open].trim_end().to_string();
        let email = value[open + 1..close].to_string();

        let rest = value[close + 1..].trim();
        let mut parts = rest.split(' ');
        let when: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::InvalidObject(format!("signature missing timestamp: {value}")))?;

        let tz = parts
            .next()
            .ok_or_else(|| Error::InvalidObject(format!("signature missing timezone: {value}")))?;
        let tz_offset = parse_tz(tz)?;

        Ok(Self {
            name,
            email,
            when,
            tz_offset,
        })
    }
}

fn parse_tz(tz: &str) -> Result<i32> {
    if tz.len() != 5 {
        return Err(Error::InvalidObject(format!("bad timezone: {tz}")));
    }
    let sign = match &tz[..1] {
        "+" => 1,
        "-" => -1,
        _ => return Err(Error::InvalidObject(format!("bad timezone: {tz}"))),
    };
    let hours: i32 = tz[1..3]
        .parse()
        .map_err(|_| Error::InvalidObject(format!("bad timezone: {tz}")))?;
    let minutes: i32 = tz[3..5]
        .parse()
        .map_err(|_| Error::InvalidObject(format!("bad timezone: {tz}")))?;
    Ok(sign * (hours * 60 + minutes))
}

/// a commit object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    /// root tree oid
    pub tree: Oid,
    /// parent commit oids (empty for initial, 1 for linear, 2+ for merge)
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
    /// ASCII-armoured signature block, without the `gpgsig ` key or
    /// continuation markers
    pub gpgsig: Option<String>,
}

impl Commit {
    pub fn new(tree: Oid, parents: Vec<Oid>, author: Signature, committer: Signature, message: impl Into<String>) -> Self {
        Self {
            tree,
            parents,
            author,
            committer,
            message: message.into(),
            gpgsig: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// serialise to the canonical commit payload
    ///
    /// headers are `key SP value LF`; a blank line separates headers from
    /// the message. multi-line values (gpgsig) continue with a single
    /// leading space per line.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("tree {}\n", self.tree));
        for parent in &self.parents {
            out.push_str(&format!("parent {parent}\n"));
        }
        out.push_str(&format!("author {}\n", self.author.render()));
        out.push_str(&format!("committer {}\n", self.committer.render()));
        if let Some(sig) = &self.gpgsig {
            out.push_str("gpgsig ");
            out.push_str(&continuation_encode(sig));
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.message);
        out.into_bytes()
    }

    /// parse a commit payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::InvalidObject("commit payload is not utf-8".to_string()))?;
        let (headers, message) = split_headers(text)?;

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut gpgsig = None;

        for (key, value) in headers {
            match key.as_str() {
                "tree" => tree = Some(Oid::from_hex(&value)?),
                "parent" => parents.push(Oid::from_hex(&value)?),
                "author" => author = Some(Signature::parse(&value)?),
                "committer" => committer = Some(Signature::parse(&value)?),
                "gpgsig" => gpgsig = Some(value),
                // unknown headers are preserved-by-ignore: parsing is
                // lenient, re-serialisation only emits known keys
                _ => {}
            }
        }

        Ok(Self {
            tree: tree.ok_or_else(|| Error::InvalidObject("commit missing tree header".to_string()))?,
            parents,
            author: author
                .ok_or_else(|| Error::InvalidObject("commit missing author header".to_string()))?,
            committer: committer
                .ok_or_else(|| Error::InvalidObject("commit missing committer header".to_string()))?,
            message: message.to_string(),
            gpgsig,
        })
    }
}

/// encode a multi-line value with continuation-line leading spaces
pub(crate) fn continuation_encode(value: &str) -> String {
    value.replace('\n', "\n ")
}

/// split a header block into (key, folded value) pairs and the message
///
/// a continuation line begins with a single space and extends the previous
/// header's value.
pub(crate) fn split_headers(text: &str) -> Result<(Vec<(String, String)>, &str)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut rest = text;

    loop {
        let Some(line_end) = rest.find('\n') else {
            return Err(Error::InvalidObject(
                "object header block not terminated".to_string(),
            ));
        };
        let line = &rest[..line_end];
        rest = &rest[line_end + 1..];

        if line.is_empty() {
            // blank separator; everything after is the message
            return Ok((headers, rest));
        }

        if let Some(cont) = line.strip_prefix(' ') {
            let Some(last) = headers.last_mut() else {
                return Err(Error::InvalidObject(
                    "continuation line before any header".to_string(),
                ));
            };
            last.1.push('\n');
            last.1.push_str(cont);
        } else {
            let (key, value) = line
                .split_once(' ')
                .ok_or_else(|| Error::InvalidObject(format!("malformed header line: {line}")))?;
            headers.push((key.to_string(), value.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Kind;
    use crate::oid::hash_object;

    fn sig() -> Signature {
        Signature::new("A U Thor", "author@example.com", 1700000000, 120)
    }

    fn oid(n: u8) -> Oid {
        Oid::from_bytes([n; 20])
    }

    #[test]
    fn test_signature_render() {
        assert_eq!(
            sig().render(),
            "A U Thor <author@example.com> 1700000000 +0200"
        );
    }

    #[test]
    fn test_signature_negative_offset() {
        let s = Signature::new("X", "x@y", 0, -330);
        assert_eq!(s.render(), "X <x@y> 0 -0530");
        assert_eq!(Signature::parse(&s.render()).unwrap(), s);
    }

    #[test]
    fn test_signature_parse_roundtrip() {
        let parsed = Signature::parse(&sig().render()).unwrap();
        assert_eq!(parsed, sig());
    }

    #[test]
    fn test_signature_parse_rejects_garbage() {
        assert!(Signature::parse("no email here 0 +0000").is_err());
        assert!(Signature::parse("X <x@y> notanumber +0000").is_err());
        assert!(Signature::parse("X <x@y> 0").is_err());
    }

    #[test]
    fn test_commit_roundtrip() {
        let commit = Commit::new(oid(1), vec![oid(2), oid(3)], sig(), sig(), "merge the things\n");
        let payload = commit.serialize();
        let parsed = Commit::parse(&payload).unwrap();
        assert_eq!(commit, parsed);
        // byte-exact re-serialisation
        assert_eq!(parsed.serialize(), payload);
    }

    #[test]
    fn test_commit_no_parents() {
        let commit = Commit::new(oid(1), vec![], sig(), sig(), "initial\n");
        let parsed = Commit::parse(&commit.serialize()).unwrap();
        assert!(parsed.is_root());
        assert!(!parsed.is_merge());
    }

    #[test]
    fn test_commit_gpgsig_continuation_lines() {
        let mut commit = Commit::new(oid(1), vec![oid(2)], sig(), sig(), "signed\n");
        commit.gpgsig = Some(
            "-----BEGIN PGP SIGNATURE-----\n\nAbCdEf\n-----END PGP SIGNATURE-----".to_string(),
        );

        let payload = commit.serialize();
        let text = String::from_utf8(payload.clone()).unwrap();
        // continuation lines carry a single leading space, blank sig lines included
        assert!(text.contains("gpgsig -----BEGIN PGP SIGNATURE-----\n \n AbCdEf\n"));

        let parsed = Commit::parse(&payload).unwrap();
        assert_eq!(parsed.gpgsig, commit.gpgsig);
        assert_eq!(parsed.serialize(), payload);
    }

    #[test]
    fn test_commit_missing_committer_rejected() {
        let text = format!("tree {}\nauthor {}\n\nmsg", oid(1), sig().render());
        assert!(Commit::parse(text.as_bytes()).is_err());
    }

    #[test]
    fn test_commit_known_oid() {
        // verified against `git hash-object -t commit`
        let commit = Commit::new(
            Oid::from_hex("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap(),
            vec![],
            Signature::new("a", "a@b", 0, 0),
            Signature::new("a", "a@b", 0, 0),
            "x\n",
        );
        let oid = hash_object(Kind::Commit, &commit.serialize());
        assert_eq!(oid.to_hex(), "cdb6f5729853304abc87a11d7ceda7eb5f02fa55");
    }

    #[test]
    fn test_commit_message_preserves_trailing_bytes() {
        let commit = Commit::new(oid(1), vec![], sig(), sig(), "no trailing newline");
        let parsed = Commit::parse(&commit.serialize()).unwrap();
        assert_eq!(parsed.message, "no trailing newline");
    }
}
