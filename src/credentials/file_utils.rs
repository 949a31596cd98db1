//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use std::path::PathBuf;

/// Expands a leading `~/` or `~\` to the current user's home directory.
pub(crate) fn expand_user_home(file_path: &str) -> String {
    if file_path.starts_with("~/") || file_path.starts_with("~\\") {
        if let Some(home_dir) = dirs::home_dir() {
            let full_path = home_dir.join(PathBuf::from(correct_path(&file_path[2..])));
            format!("{}", full_path.display())
        } else {
            file_path.to_string()
        }
    } else {
        file_path.to_string()
    }
}

fn correct_path(file_path: &str) -> String {
    if cfg!(target_os = "windows") {
        file_path.replace('/', "\\")
    } else {
        file_path.to_string()
    }
}
