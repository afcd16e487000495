//! Masking stage: replaces sensitive values with masked or derived ones.

use anyhow::{Context, anyhow};
use base64::{Engine, engine::general_purpose};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde_json::Value;
use sha2::{Digest, Sha256};

use hub_core::enums::{GovernanceStage, IssueSeverity};
use hub_core::governance::{ISSUE_MASKING_ERROR, Issue, RuleOutcome};
use hub_core::rules::governance::{MaskingRule, MaskingStrategy, SensitiveKind};
use hub_core::value::{Record, value_as_string};

use super::StageReport;

fn digest_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

const NONCE_LEN: usize = 12;

fn cipher(key: &str) -> anyhow::Result<ChaCha20Poly1305> {
    let derived = Sha256::digest(key.as_bytes());
    ChaCha20Poly1305::new_from_slice(&derived).map_err(|e| anyhow!("cipher creation failed: {e}"))
}

fn encrypt(key: &str, text: &str) -> anyhow::Result<String> {
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let mut sealed = cipher(key)?
        .encrypt(&nonce, text.as_bytes())
        .map_err(|e| anyhow!("encryption failed: {e}"))?;
    let mut out = nonce.to_vec();
    out.append(&mut sealed);
    Ok(general_purpose::STANDARD.encode(out))
}

/// Reverse an `encrypt` masking with the rule's key.
pub fn decrypt(key: &str, masked: &str) -> anyhow::Result<String> {
    let bytes = general_purpose::STANDARD
        .decode(masked)
        .context("masked value is not base64")?;
    if bytes.len() < NONCE_LEN {
        return Err(anyhow!("masked value is too short"));
    }
    let (nonce, sealed) = bytes.split_at(NONCE_LEN);
    let plain = cipher(key)?
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|e| anyhow!("decryption failed: {e}"))?;
    String::from_utf8(plain).context("decrypted value is not UTF-8")
}

fn mask(text: &str, prefix: usize, suffix: usize, mask_char: char) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if (prefix == 0 && suffix == 0) || len <= prefix + suffix {
        return std::iter::repeat_n(mask_char, len).collect();
    }
    chars[..prefix]
        .iter()
        .copied()
        .chain(std::iter::repeat_n(mask_char, len - prefix - suffix))
        .chain(chars[len - suffix..].iter().copied())
        .collect()
}

fn anonymize(text: &str, kind: SensitiveKind) -> String {
    match kind {
        SensitiveKind::Name => "Anonymous".into(),
        SensitiveKind::Email => match text.split_once('@') {
            Some((_, domain)) if !domain.is_empty() && !domain.contains('@') => {
                format!("anonymous@{domain}")
            }
            _ => "anonymous@example.com".into(),
        },
        SensitiveKind::Phone => {
            let chars: Vec<char> = text.chars().collect();
            if chars.len() >= 7 {
                let head: String = chars[..3].iter().collect();
                let tail: String = chars[chars.len() - 4..].iter().collect();
                format!("{head}****{tail}")
            } else {
                "****".into()
            }
        }
        SensitiveKind::General => "***".into(),
    }
}

fn pseudonymize(text: &str, kind: SensitiveKind) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let short = hex::encode(&digest[..4]);
    match kind {
        SensitiveKind::Name => format!("User_{short}"),
        SensitiveKind::Email => format!("user_{short}@example.com"),
        SensitiveKind::Phone => {
            let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 100_000_000;
            format!("138{n:08}")
        }
        SensitiveKind::General => format!("PSEUDO_{short}"),
    }
}

/// Apply one strategy to one value's text.
pub fn mask_text(strategy: &MaskingStrategy, text: &str) -> anyhow::Result<String> {
    Ok(match strategy {
        MaskingStrategy::Mask {
            prefix_length,
            suffix_length,
            mask_char,
        } => mask(text, *prefix_length, *suffix_length, *mask_char),
        MaskingStrategy::Hash { salt } => digest_hex(&[salt.as_bytes(), text.as_bytes()]),
        MaskingStrategy::Encrypt { key } => encrypt(key, text)?,
        MaskingStrategy::Tokenize { prefix } => {
            let digest = digest_hex(&[text.as_bytes()]);
            format!("{prefix}{}", &digest[..16])
        }
        MaskingStrategy::Anonymize { kind } => anonymize(text, *kind),
        MaskingStrategy::Pseudonymize { kind } => pseudonymize(text, *kind),
    })
}

/// Enabled masking rules, highest priority first.
#[derive(Debug)]
pub struct MaskingStage {
    rules: Vec<MaskingRule>,
}

impl MaskingStage {
    #[must_use]
    pub fn new(rules: &[MaskingRule]) -> Self {
        let mut rules: Vec<MaskingRule> = rules.iter().filter(|r| r.enabled).cloned().collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn apply(&self, records: Vec<Record>, ids: &[String]) -> StageReport {
        let mut report = StageReport::new(
            self.rules
                .iter()
                .map(|r| RuleOutcome::new(GovernanceStage::Masking, &r.id, &r.name, r.strategy.as_str()))
                .collect(),
        );

        for (mut record, id) in records.into_iter().zip(ids) {
            let mut fired = false;
            for (rule, outcome) in self.rules.iter().zip(report.outcomes.iter_mut()) {
                outcome.records_evaluated += 1;
                let mut modified = false;
                for field in &rule.fields {
                    let Some(value) = record.get(field) else {
                        continue;
                    };
                    if value.is_array() || value.is_object() {
                        outcome.issues += 1;
                        report.issues.push(
                            Issue::new(
                                ISSUE_MASKING_ERROR,
                                IssueSeverity::Error,
                                id,
                                format!("cannot {} a structured value", rule.strategy.as_str()),
                            )
                            .with_field(field)
                            .with_rule(&rule.id),
                        );
                        continue;
                    }
                    let Some(text) = value_as_string(value) else {
                        continue;
                    };
                    let masked = match mask_text(&rule.strategy, &text) {
                        Ok(masked) => Value::String(masked),
                        Err(e) => {
                            outcome.issues += 1;
                            report.issues.push(
                                Issue::new(ISSUE_MASKING_ERROR, IssueSeverity::Error, id, e.to_string())
                                    .with_field(field)
                                    .with_rule(&rule.id),
                            );
                            continue;
                        }
                    };
                    if *value != masked {
                        record.insert(field.clone(), masked);
                        modified = true;
                    }
                }
                if modified {
                    outcome.records_affected += 1;
                    fired = true;
                }
            }
            if fired {
                report.applied += 1;
            }
            report.records.push(record);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn mask_rule(prefix: usize, suffix: usize) -> MaskingStrategy {
        MaskingStrategy::Mask {
            prefix_length: prefix,
            suffix_length: suffix,
            mask_char: '*',
        }
    }

    #[rstest]
    #[case(mask_rule(3, 4), "13812345678", "138****5678")]
    #[case(mask_rule(2, 2), "abc", "***")]
    #[case(mask_rule(0, 0), "secret", "******")]
    #[case(MaskingStrategy::Anonymize { kind: SensitiveKind::Email }, "ada@corp.io", "anonymous@corp.io")]
    #[case(MaskingStrategy::Anonymize { kind: SensitiveKind::Phone }, "13812345678", "138****5678")]
    #[case(MaskingStrategy::Anonymize { kind: SensitiveKind::General }, "x", "***")]
    fn strategies(#[case] strategy: MaskingStrategy, #[case] input: &str, #[case] expected: &str) {
        assert_eq!(mask_text(&strategy, input).unwrap(), expected);
    }

    #[test]
    fn derived_values_are_deterministic() {
        let hash = MaskingStrategy::Hash { salt: "s".into() };
        let digest = mask_text(&hash, "ada").unwrap();
        assert_eq!(digest, mask_text(&hash, "ada").unwrap());
        assert_eq!(digest.len(), 64);
        assert_ne!(
            digest,
            mask_text(&MaskingStrategy::Hash { salt: String::new() }, "ada").unwrap()
        );

        let token = mask_text(&MaskingStrategy::Tokenize { prefix: "tok_".into() }, "ada").unwrap();
        assert!(token.starts_with("tok_") && token.len() == 20);

        let email = mask_text(
            &MaskingStrategy::Pseudonymize {
                kind: SensitiveKind::Email,
            },
            "ada@corp.io",
        )
        .unwrap();
        assert!(email.starts_with("user_") && email.ends_with("@example.com"));
        let phone = mask_text(
            &MaskingStrategy::Pseudonymize {
                kind: SensitiveKind::Phone,
            },
            "13812345678",
        )
        .unwrap();
        assert_eq!(phone.len(), 11);
    }

    #[test]
    fn encrypted_values_decrypt_with_the_rule_key() {
        let strategy = MaskingStrategy::Encrypt { key: "k1".into() };
        let first = mask_text(&strategy, "ada@corp.io").unwrap();
        let second = mask_text(&strategy, "ada@corp.io").unwrap();
        assert_ne!(first, "ada@corp.io");
        assert_ne!(first, second);
        assert_eq!(decrypt("k1", &first).unwrap(), "ada@corp.io");
        assert_eq!(decrypt("k1", &second).unwrap(), "ada@corp.io");
        assert!(decrypt("k2", &first).is_err());
        assert!(decrypt("k1", "c2hvcnQ=").is_err());
    }

    #[test]
    fn encrypt_rule_masks_records_in_place() {
        let stage = MaskingStage::new(&[MaskingRule::new(
            "enc",
            MaskingStrategy::Encrypt { key: "k1".into() },
            ["ssn"],
        )]);
        let record = json!({"ssn": "123-45-6789"}).as_object().cloned().unwrap();
        let report = stage.apply(vec![record], &["r0".to_string()]);
        assert!(report.issues.is_empty());
        let sealed = report.records[0]["ssn"].as_str().unwrap();
        assert_eq!(decrypt("k1", sealed).unwrap(), "123-45-6789");
    }

    #[test]
    fn structured_values_raise_issues_and_stay() {
        let stage = MaskingStage::new(&[MaskingRule::new("m", mask_rule(1, 1), ["address", "phone"])]);
        let record = json!({"address": {"city": "Oslo"}, "phone": "12345"})
            .as_object()
            .cloned()
            .unwrap();
        let report = stage.apply(vec![record], &["r0".to_string()]);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].issue_type, ISSUE_MASKING_ERROR);
        assert_eq!(report.records[0]["phone"], json!("1***5"));
        assert_eq!(report.applied, 1);
    }
}
