use p256::ecdsa::SigningKey;
use serde_json::Map;
use tracing::debug;

use super::{jws, CryptoError, DigestAlgorithm, SdJwt, KB_JWT_TYP};
use crate::utils::now_secs;

/// Parameters of the key binding JWT appended to a presentation.
#[derive(Debug, Clone)]
pub struct KeyBinding<'a> {
    pub key: &'a SigningKey,
    pub audience: &'a str,
    pub nonce: &'a str,
    /// Issuance time in seconds since the epoch; defaults to now.
    pub issued_at: Option<u64>,
}

impl<'a> KeyBinding<'a> {
    pub fn new(key: &'a SigningKey, audience: &'a str, nonce: &'a str) -> Self {
        Self {
            key,
            audience,
            nonce,
            issued_at: None,
        }
    }

    pub fn issued_at(mut self, iat: u64) -> Self {
        self.issued_at = Some(iat);
        self
    }

    fn sign(&self, sd_jwt_unbound: &str, alg: DigestAlgorithm) -> Result<String, CryptoError> {
        let mut header = Map::new();
        header.insert("typ".into(), KB_JWT_TYP.into());

        let mut payload = Map::new();
        payload.insert("iat".into(), self.issued_at.unwrap_or_else(now_secs).into());
        payload.insert("aud".into(), self.audience.into());
        payload.insert("nonce".into(), self.nonce.into());
        payload.insert("sd_hash".into(), alg.digest(sd_jwt_unbound).into());

        jws::sign_es256(header, &payload, self.key)
    }
}

impl SdJwt {
    /// Builds a presentation revealing only the `selected` disclosures,
    /// identified by their encoded form.
    ///
    /// Disclosures keep their credential order and each appears at most once.
    /// Any key binding already attached to `self` is discarded.
    pub fn present<S: AsRef<str>>(
        &self,
        selected: &[S],
        key_binding: Option<&KeyBinding<'_>>,
    ) -> Result<String, CryptoError> {
        if let Some(unknown) = selected
            .iter()
            .map(AsRef::as_ref)
            .find(|id| !self.disclosures.iter().any(|d| d.encoded() == *id))
        {
            return Err(CryptoError::Malformed(format!(
                "disclosure `{unknown}` is not part of this credential"
            )));
        }

        let disclosures = self
            .disclosures
            .iter()
            .filter(|d| selected.iter().any(|id| id.as_ref() == d.encoded()))
            .cloned()
            .collect();
        let mut presentation = SdJwt::new(self.jwt.clone(), disclosures);

        if let Some(kb) = key_binding {
            let alg = SdJwt::digest_algorithm(&self.payload_unverified()?)?;
            let kb_jwt = kb.sign(&presentation.serialize_unbound(), alg)?;
            presentation.key_binding = Some(kb_jwt);
        }

        debug!(
            disclosed = presentation.disclosures.len(),
            withheld = self.disclosures.len() - presentation.disclosures.len(),
            "created SD-JWT presentation"
        );
        Ok(presentation.serialize())
    }
}

/// Parses `issuance` and presents the `selected` disclosures.
pub fn create_presentation<S: AsRef<str>>(
    issuance: &str,
    selected: &[S],
    key_binding: Option<&KeyBinding<'_>>,
) -> Result<String, CryptoError> {
    SdJwt::parse_issued(issuance)?.present(selected, key_binding)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::sd_jwt::{construct, IssuancePolicy};

    fn credential() -> SdJwt {
        let disclosable = json!({"given_name": "Bob", "family_name": "Smith", "dob": "1990-01-01"});
        construct(
            disclosable.as_object().unwrap(),
            &Map::new(),
            &SigningKey::random(&mut rand::thread_rng()),
            None,
            &IssuancePolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn presents_only_selected_in_credential_order() {
        let sd_jwt = credential();
        let dob = sd_jwt.disclosures()[2].encoded().to_owned();
        let given_name = sd_jwt.disclosures()[0].encoded().to_owned();

        let presentation = sd_jwt.present(&[&dob, &given_name], None).unwrap();
        assert_eq!(
            presentation,
            format!("{}~{given_name}~{dob}~", sd_jwt.jwt())
        );
    }

    #[test]
    fn empty_selection_keeps_trailing_separator() {
        let sd_jwt = credential();
        let presentation = create_presentation(&sd_jwt.serialize(), &[] as &[String], None).unwrap();
        assert_eq!(presentation, format!("{}~", sd_jwt.jwt()));
    }

    #[test]
    fn unknown_disclosure_rejected() {
        let sd_jwt = credential();
        assert!(matches!(
            sd_jwt.present(&["WyJzYWx0IiwibmFtZSIsMV0"], None),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn key_binding_commits_to_presented_material() {
        let sd_jwt = credential();
        let holder = SigningKey::random(&mut rand::thread_rng());
        let selected = [sd_jwt.disclosures()[1].encoded()];
        let kb = KeyBinding::new(&holder, "https://verifier.example", "nonce-1").issued_at(1_700_000_000);

        let presentation = SdJwt::parse(&sd_jwt.present(&selected, Some(&kb)).unwrap()).unwrap();
        let kb_jwt = presentation.key_binding().unwrap();
        let (header, payload) = jws::verify_es256(kb_jwt, holder.verifying_key()).unwrap();
        assert_eq!(header["typ"], KB_JWT_TYP);
        assert_eq!(payload["aud"], "https://verifier.example");
        assert_eq!(payload["nonce"], "nonce-1");
        assert_eq!(payload["iat"], 1_700_000_000u64);
        assert_eq!(
            payload["sd_hash"],
            DigestAlgorithm::Sha256.digest(&presentation.serialize_unbound())
        );
    }
}
