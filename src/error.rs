// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde::Serialize;

/// Who has to act on a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// The caller must fix something: ownership, credentials, input.
    Client,
    /// The remote side or our own storage failed; retrying later may succeed.
    Infrastructure,
}

/// Message shown to the user for a fatal sync failure.
pub fn user_hint(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Client => "check your credentials",
        ErrorClass::Infrastructure => "temporary failure, try again shortly",
    }
}
