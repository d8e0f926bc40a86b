//! Classification of remote response statuses.

/// What a response status means to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMeaning {
    /// The request reached a definite outcome: 2xx, 304, 404 or 412.
    pub successful: bool,
    /// A conditional request lost a race (412).
    pub conflict: bool,
    /// The remote refused the credentials (401, 402, 403).
    pub unauthorized: bool,
    /// Nothing exists at the path (404).
    pub not_found: bool,
    /// The response carries new state (anything but 304).
    pub changed: bool,
}

/// Interprets an HTTP-style status code.
pub fn interpret_status(status: u16) -> StatusMeaning {
    StatusMeaning {
        successful: (200..300).contains(&status) || matches!(status, 304 | 404 | 412),
        conflict: status == 412,
        unauthorized: matches!(status, 401..=403),
        not_found: status == 404,
        changed: status != 304,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        let ok = interpret_status(200);
        assert!(ok.successful && ok.changed && !ok.conflict);

        let created = interpret_status(201);
        assert!(created.successful);

        let not_modified = interpret_status(304);
        assert!(not_modified.successful);
        assert!(!not_modified.changed);

        let missing = interpret_status(404);
        assert!(missing.successful && missing.not_found);

        let conflict = interpret_status(412);
        assert!(conflict.successful && conflict.conflict);

        for status in [401, 402, 403] {
            let denied = interpret_status(status);
            assert!(denied.unauthorized);
            assert!(!denied.successful);
        }

        let failed = interpret_status(500);
        assert!(!failed.successful && !failed.unauthorized);
    }
}
