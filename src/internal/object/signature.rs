//! Signature lines carried by commits and tags: who acted, when, and in
//! which timezone. The wire form is `<role> <name> <email> <unix-secs> <±HHMM>`,
//! byte-compatible with Git.

use std::fmt::Display;

use bstr::ByteSlice;

use crate::errors::WitError;

/// The role a signature plays inside the owning object.
#[derive(PartialEq, Eq, Debug, Hash, Ord, PartialOrd, Clone, Copy)]
pub enum SignatureType {
    Author,
    Committer,
    Tagger,
}

impl SignatureType {
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            SignatureType::Author => b"author",
            SignatureType::Committer => b"committer",
            SignatureType::Tagger => b"tagger",
        }
    }

    pub fn from_data(data: &[u8]) -> Result<SignatureType, WitError> {
        match data {
            b"author" => Ok(SignatureType::Author),
            b"committer" => Ok(SignatureType::Committer),
            b"tagger" => Ok(SignatureType::Tagger),
            _ => Err(WitError::MalformedObject(format!(
                "`{}` is not a valid signature role",
                String::from_utf8_lossy(data)
            ))),
        }
    }
}

impl Display for SignatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureType::Author => write!(f, "author"),
            SignatureType::Committer => write!(f, "committer"),
            SignatureType::Tagger => write!(f, "tagger"),
        }
    }
}

/// One signature line: role, identity, unix timestamp and `±HHMM` zone.
#[derive(PartialEq, Eq, Debug, Hash, Ord, PartialOrd, Clone)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub timezone: String,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.timezone
        )
    }
}

impl Signature {
    /// Build a signature stamped with the current time in UTC.
    pub fn now(signature_type: SignatureType, name: String, email: String) -> Signature {
        Signature {
            signature_type,
            name,
            email,
            timestamp: chrono::Utc::now().timestamp(),
            timezone: "+0000".to_string(),
        }
    }

    /// Parse one signature line, e.g.
    /// `author Jane Doe <jane@example.org> 1712000000 +0200`.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, WitError> {
        let malformed =
            || WitError::MalformedObject("truncated signature line".to_string());

        // Role token runs to the first space.
        let role_end = data.find_byte(0x20).ok_or_else(malformed)?;
        let signature_type = SignatureType::from_data(&data[..role_end])?;
        let rest = &data[role_end + 1..];

        // The name runs up to ` <`; the email sits inside the angle brackets.
        let email_open = rest.find_byte(b'<').ok_or_else(malformed)?;
        let email_close = rest.find_byte(b'>').ok_or_else(malformed)?;
        if email_close < email_open || email_open == 0 {
            return Err(malformed());
        }
        let name = rest[..email_open - 1].to_str_lossy().into_owned();
        let email = rest[email_open + 1..email_close].to_str_lossy().into_owned();

        // Timestamp and zone are the two space-separated tail fields.
        let tail = rest[email_close + 1..].trim_ascii();
        let mut fields = tail.splitn_str(2, " ");
        let timestamp = fields
            .next()
            .and_then(|f| f.to_str().ok())
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(malformed)?;
        let timezone = fields
            .next()
            .map(|f| f.to_str_lossy().into_owned())
            .unwrap_or_else(|| "+0000".to_string());

        Ok(Signature {
            signature_type,
            name,
            email,
            timestamp,
            timezone,
        })
    }

    /// Serialize back to the wire form, role token included.
    pub fn to_data(&self) -> Result<Vec<u8>, WitError> {
        let mut sign = Vec::new();
        sign.extend_from_slice(self.signature_type.to_bytes());
        sign.extend_from_slice(b" ");
        sign.extend_from_slice(self.name.as_bytes());
        sign.extend_from_slice(b" <");
        sign.extend_from_slice(self.email.as_bytes());
        sign.extend_from_slice(b"> ");
        sign.extend_from_slice(self.timestamp.to_string().as_bytes());
        sign.extend_from_slice(b" ");
        sign.extend_from_slice(self.timezone.as_bytes());
        Ok(sign)
    }
}
