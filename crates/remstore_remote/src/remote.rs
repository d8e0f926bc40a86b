//! The remote adapter contract.
//!
//! The sync engine talks to every backend through [`Remote`]. Adapters
//! translate these calls into their wire protocol and report HTTP-style
//! statuses back; the engine never special-cases a backend.

use std::sync::Arc;

use async_trait::async_trait;
use remstore_node::{Body, ProtocolVersion};

use crate::error::RemoteResult;
use crate::listing::FolderListing;

/// Conditional request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Only apply if the current revision equals this tag.
    pub if_match: Option<String>,
    /// Only apply if the current revision differs from this tag.
    /// `*` means "only if nothing exists".
    pub if_none_match: Option<String>,
}

impl RequestOptions {
    /// Unconditional request.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// `If-Match: revision`.
    pub fn if_match(revision: impl Into<String>) -> Self {
        Self {
            if_match: Some(revision.into()),
            if_none_match: None,
        }
    }

    /// `If-None-Match: revision`.
    pub fn if_none_match(revision: impl Into<String>) -> Self {
        Self {
            if_match: None,
            if_none_match: Some(revision.into()),
        }
    }

    /// `If-None-Match: *`, a pure create.
    #[must_use]
    pub fn create_only() -> Self {
        Self::if_none_match("*")
    }
}

/// Payload of a successful read.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteContent {
    /// A document body.
    Document(Body),
    /// A folder listing.
    Listing(FolderListing),
}

/// A remote's answer to one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    /// HTTP-style status code.
    pub status: u16,
    /// Body or listing, for reads that returned one.
    pub content: Option<RemoteContent>,
    /// Content type of a document body.
    pub content_type: Option<String>,
    /// Revision tag, without quotes.
    pub revision: Option<String>,
}

impl RemoteResponse {
    /// A response with only a status.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            content: None,
            content_type: None,
            revision: None,
        }
    }

    /// Sets the revision tag.
    #[must_use]
    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }

    /// Sets a document body and its content type.
    #[must_use]
    pub fn with_document(mut self, body: Body, content_type: Option<String>) -> Self {
        self.content = Some(RemoteContent::Document(body));
        self.content_type = content_type;
        self
    }

    /// Sets a folder listing.
    #[must_use]
    pub fn with_listing(mut self, listing: FolderListing) -> Self {
        self.content = Some(RemoteContent::Listing(listing));
        self
    }

    /// Returns the listing, if the response carries one.
    #[must_use]
    pub fn listing(&self) -> Option<&FolderListing> {
        match &self.content {
            Some(RemoteContent::Listing(listing)) => Some(listing),
            _ => None,
        }
    }

    /// Returns the document body, if the response carries one.
    #[must_use]
    pub fn body(&self) -> Option<&Body> {
        match &self.content {
            Some(RemoteContent::Document(body)) => Some(body),
            _ => None,
        }
    }
}

/// A remote storage backend.
///
/// Statuses of every kind come back as `Ok`; `Err` is reserved for
/// requests that produced no response at all.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Returns true if the adapter knows where the storage is and how to
    /// authorize against it.
    fn connected(&self) -> bool;

    /// Returns true if the last request reached the remote.
    fn online(&self) -> bool;

    /// Overrides the online flag.
    fn set_online(&self, online: bool);

    /// Protocol version spoken by the remote.
    fn protocol(&self) -> ProtocolVersion;

    /// Reads a document or folder.
    async fn get(&self, path: &str, options: RequestOptions) -> RemoteResult<RemoteResponse>;

    /// Writes a document.
    async fn put(
        &self,
        path: &str,
        body: Body,
        content_type: Option<String>,
        options: RequestOptions,
    ) -> RemoteResult<RemoteResponse>;

    /// Deletes a document.
    async fn delete(&self, path: &str, options: RequestOptions) -> RemoteResult<RemoteResponse>;
}

#[async_trait]
impl<T: Remote + ?Sized> Remote for Arc<T> {
    fn connected(&self) -> bool {
        (**self).connected()
    }

    fn online(&self) -> bool {
        (**self).online()
    }

    fn set_online(&self, online: bool) {
        (**self).set_online(online)
    }

    fn protocol(&self) -> ProtocolVersion {
        (**self).protocol()
    }

    async fn get(&self, path: &str, options: RequestOptions) -> RemoteResult<RemoteResponse> {
        (**self).get(path, options).await
    }

    async fn put(
        &self,
        path: &str,
        body: Body,
        content_type: Option<String>,
        options: RequestOptions,
    ) -> RemoteResult<RemoteResponse> {
        (**self).put(path, body, content_type, options).await
    }

    async fn delete(&self, path: &str, options: RequestOptions) -> RemoteResult<RemoteResponse> {
        (**self).delete(path, options).await
    }
}
