/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;

/// Per-token adjustment applied on top of the server's FEAT reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpFeatureOverride {
    Enable,
    Disable,
    /// Replace the token's parameter, e.g. `MLST` fact list.
    Param(String),
}

/// The negotiated server feature set: the ordered FEAT tokens plus the
/// flags the client actually dispatches on.
#[derive(Debug, Default, Clone)]
pub struct FtpServerFeature {
    tokens: Vec<String>,
    utf8_path: bool,
    file_size: bool,
    file_mtime: bool,
    rest_stream: bool,
    machine_list: bool,
    extended_passive: bool,
    extended_port: bool,
    auth_tls: bool,
    deflate_mode: bool,
}

impl FtpServerFeature {
    /// Parse the body of a 211 FEAT reply: one feature per line between
    /// the initial and terminating lines, whitespace-trimmed.
    pub(crate) fn parse_feat_reply(text: &str) -> Self {
        let mut feature = FtpServerFeature::default();
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() > 2 {
            for line in &lines[1..lines.len() - 1] {
                let token = line.trim();
                if !token.is_empty() {
                    feature.tokens.push(token.to_string());
                }
            }
        }
        feature.rebuild_flags();
        feature
    }

    pub(crate) fn apply_override(&mut self, name: &str, value: &FtpFeatureOverride) {
        let pos = self
            .tokens
            .iter()
            .position(|t| token_name(t).eq_ignore_ascii_case(name));
        match value {
            FtpFeatureOverride::Enable => {
                if pos.is_none() {
                    self.tokens.push(name.to_uppercase());
                }
            }
            FtpFeatureOverride::Disable => {
                if let Some(i) = pos {
                    self.tokens.remove(i);
                }
            }
            FtpFeatureOverride::Param(param) => {
                let token = format!("{} {param}", name.to_uppercase());
                match pos {
                    Some(i) => self.tokens[i] = token,
                    None => self.tokens.push(token),
                }
            }
        }
        self.rebuild_flags();
    }

    fn rebuild_flags(&mut self) {
        self.utf8_path = false;
        self.file_size = false;
        self.file_mtime = false;
        self.rest_stream = false;
        self.machine_list = false;
        self.extended_passive = false;
        self.extended_port = false;
        self.auth_tls = false;
        self.deflate_mode = false;
        for token in &self.tokens {
            let (f, v) = token.split_once(' ').unwrap_or((token.as_str(), ""));
            match f.to_lowercase().as_str() {
                "utf8" => self.utf8_path = true,
                "size" => self.file_size = true,
                "mdtm" => self.file_mtime = true,
                "rest" => {
                    if v.to_lowercase().eq("stream") {
                        self.rest_stream = true;
                    }
                }
                "mlst" | "mlsd" => self.machine_list = true,
                "epsv" => self.extended_passive = true,
                "eprt" => self.extended_port = true,
                "auth" => {
                    let v = v.to_lowercase();
                    if v.eq("tls") || v.eq("ssl") {
                        self.auth_tls = true;
                    }
                }
                "mode" => {
                    if v.to_lowercase().eq("z") {
                        self.deflate_mode = true;
                    }
                }
                _ => {}
            }
        }
    }

    /// Whether a FEAT reply was seen at all (an empty set also means the
    /// server answered FEAT with 500/502).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[inline]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.tokens.iter().find_map(|t| {
            let (f, v) = t.split_once(' ')?;
            f.eq_ignore_ascii_case(name).then_some(v)
        })
    }

    #[inline]
    pub fn support_utf8_path(&self) -> bool {
        self.utf8_path
    }

    #[inline]
    pub fn support_file_size(&self) -> bool {
        self.file_size
    }

    #[inline]
    pub fn support_file_mtime(&self) -> bool {
        self.file_mtime
    }

    #[inline]
    pub fn support_rest_stream(&self) -> bool {
        self.rest_stream
    }

    #[inline]
    pub fn support_machine_list(&self) -> bool {
        self.machine_list
    }

    #[inline]
    pub fn support_epsv(&self) -> bool {
        self.extended_passive
    }

    #[inline]
    pub fn support_eprt(&self) -> bool {
        self.extended_port
    }

    #[inline]
    pub fn support_auth_tls(&self) -> bool {
        self.auth_tls
    }

    #[inline]
    pub fn support_deflate_mode(&self) -> bool {
        self.deflate_mode
    }
}

fn token_name(token: &str) -> &str {
    token.split_once(' ').map(|(f, _)| f).unwrap_or(token)
}

/// Commands the server answered 500/502 to. Entries are monotonic: once
/// recorded unsupported a command is never retried within the session.
#[derive(Debug, Default)]
pub struct FtpCommandSupport {
    map: HashMap<&'static str, bool>,
}

impl FtpCommandSupport {
    pub(crate) fn mark_unsupported(&mut self, verb: &'static str) {
        self.map.insert(verb, false);
    }

    pub(crate) fn mark_supported(&mut self, verb: &'static str) {
        self.map.entry(verb).or_insert(true);
    }

    pub fn known_unsupported(&self, verb: &str) -> bool {
        self.map.get(verb) == Some(&false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEAT_TEXT: &str = "Features:\n SIZE\n MDTM\n REST STREAM\n MLST type*;size*;modify*;\n EPSV\n UTF8\n AUTH TLS\n MODE Z\nEnd";

    #[test]
    fn parse_feat() {
        let f = FtpServerFeature::parse_feat_reply(FEAT_TEXT);
        assert!(f.support_file_size());
        assert!(f.support_file_mtime());
        assert!(f.support_rest_stream());
        assert!(f.support_machine_list());
        assert!(f.support_epsv());
        assert!(!f.support_eprt());
        assert!(f.support_utf8_path());
        assert!(f.support_auth_tls());
        assert!(f.support_deflate_mode());
        assert_eq!(f.param("mlst"), Some("type*;size*;modify*;"));
        assert_eq!(f.tokens().len(), 8);
    }

    #[test]
    fn parse_feat_empty() {
        let f = FtpServerFeature::parse_feat_reply("End");
        assert!(f.is_empty());
        assert!(!f.support_file_size());
    }

    #[test]
    fn overrides() {
        let mut f = FtpServerFeature::parse_feat_reply(FEAT_TEXT);
        f.apply_override("EPSV", &FtpFeatureOverride::Disable);
        assert!(!f.support_epsv());
        f.apply_override("EPRT", &FtpFeatureOverride::Enable);
        assert!(f.support_eprt());
        f.apply_override("MLST", &FtpFeatureOverride::Param("type*;size*;".to_string()));
        assert_eq!(f.param("mlst"), Some("type*;size*;"));
    }

    #[test]
    fn support_is_monotonic() {
        let mut s = FtpCommandSupport::default();
        assert!(!s.known_unsupported("PASV"));
        s.mark_unsupported("PASV");
        assert!(s.known_unsupported("PASV"));
        s.mark_supported("PASV");
        assert!(s.known_unsupported("PASV"));
        s.mark_supported("SIZE");
        assert!(!s.known_unsupported("SIZE"));
    }
}
