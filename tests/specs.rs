// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level black-box specs: drive the compiled `prepcache`
//! binary as a subprocess the way an operator would, rather than
//! calling into the coordinator directly. Complements the in-process
//! integration tests that live alongside each crate.

mod prelude;

mod cli {
    mod help;
    mod submit;
}
