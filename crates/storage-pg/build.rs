// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

fn main() {
    // Embedded migrations must be picked up when a new file is added
    println!("cargo:rerun-if-changed=migrations");
}
