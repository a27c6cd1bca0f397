// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SASL XOAUTH2 for OAuth mailboxes.
//!
//! async-imap base64-encodes whatever `process` returns, so the raw
//! `user=..\x01auth=Bearer ..\x01\x01` string is handed over as-is.

use async_imap::Authenticator;

use crate::models::mask_secret;

#[derive(Clone)]
pub struct XOAuth2Authenticator {
    user: String,
    access_token: String,
}

impl XOAuth2Authenticator {
    pub fn new(user: &str, access_token: &str) -> Self {
        Self {
            user: user.to_string(),
            access_token: access_token.to_string(),
        }
    }

    pub fn initial_response(&self) -> String {
        format!("user={}\x01auth=Bearer {}\x01\x01", self.user, self.access_token)
    }
}

impl std::fmt::Debug for XOAuth2Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XOAuth2Authenticator")
            .field("user", &self.user)
            .field("access_token", &mask_secret(&self.access_token))
            .finish()
    }
}

impl Authenticator for XOAuth2Authenticator {
    type Response = String;

    // An error challenge is answered with the same response; the server then
    // fails the command with the real reason.
    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        self.initial_response()
    }
}
