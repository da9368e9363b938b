//! Read-through client over an external transport.
//!
//! The transport performs the actual I/O and is a collaborator, not part of
//! the core: it resolves to a raw response object or an error, and the
//! client decides what reaches the store. Queries are served from the cache
//! when the read is complete, mutations always go to the network and write
//! through.

use futures::future::BoxFuture;

use crate::cache::Cache;
use crate::config::CacheConfig;
use crate::document::{QueryDocument, Variables};
use crate::error::{CacheError, ResponseError, Result};

/// A raw response from the transport: data, errors, or both (partial
/// responses carry both and are still written field-wise).
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
  pub data: Option<serde_json::Value>,
  pub errors: Vec<ResponseError>,
}

impl TransportResponse {
  pub fn data(data: serde_json::Value) -> Self {
    Self {
      data: Some(data),
      errors: Vec::new(),
    }
  }

  pub fn errors(errors: Vec<ResponseError>) -> Self {
    Self {
      data: None,
      errors,
    }
  }
}

/// The transport contract. Implementations typically clone what they need
/// from the document and variables before returning the future.
pub trait Transport {
  fn execute(
    &self,
    document: &QueryDocument,
    variables: &Variables,
  ) -> BoxFuture<'static, std::result::Result<TransportResponse, String>>;
}

/// Where a query result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
  /// Served entirely from the store, no I/O performed.
  Cache,
  /// Fetched from the transport (and written through) on this call.
  Network,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
  /// Skip the cache read and always hit the transport.
  pub bypass_cache: bool,
}

/// A delivered query or mutation result.
#[derive(Debug, Clone)]
pub struct QueryResult {
  pub data: serde_json::Value,
  pub complete: bool,
  pub source: ResultSource,
  /// Errors returned alongside partial data, empty otherwise.
  pub errors: Vec<ResponseError>,
}

/// Cache-fronted client: the same shape as talking to the transport
/// directly, with reads served locally whenever the store can satisfy them.
pub struct Client<T: Transport> {
  cache: Cache,
  transport: T,
}

impl<T: Transport> Client<T> {
  pub fn new(transport: T, config: CacheConfig) -> Self {
    Self {
      cache: Cache::new(config),
      transport,
    }
  }

  pub fn cache(&self) -> &Cache {
    &self.cache
  }

  pub fn cache_mut(&mut self) -> &mut Cache {
    &mut self.cache
  }

  /// Read-through query: a complete cache read is returned without I/O;
  /// otherwise fetch, write the response, and re-read.
  pub async fn query(
    &mut self,
    document: &QueryDocument,
    variables: &Variables,
    options: QueryOptions,
  ) -> Result<QueryResult> {
    if !options.bypass_cache {
      let cached = self.cache.read(document, variables)?;
      if cached.complete {
        return Ok(QueryResult {
          data: cached.data,
          complete: true,
          source: ResultSource::Cache,
          errors: Vec::new(),
        });
      }
    }
    self.fetch(document, variables).await
  }

  /// Mutations always go through the transport, then write through.
  pub async fn mutate(
    &mut self,
    document: &QueryDocument,
    variables: &Variables,
  ) -> Result<QueryResult> {
    self.fetch(document, variables).await
  }

  async fn fetch(
    &mut self,
    document: &QueryDocument,
    variables: &Variables,
  ) -> Result<QueryResult> {
    let response = self
      .transport
      .execute(document, variables)
      .await
      .map_err(CacheError::Transport)?;

    match response.data {
      Some(data) => {
        self.cache.write(document, variables, &data)?;
        let read = self.cache.read(document, variables)?;
        Ok(QueryResult {
          data: read.data,
          complete: read.complete,
          source: ResultSource::Network,
          errors: response.errors,
        })
      }
      // No usable data: surface the errors, store untouched.
      None => Err(CacheError::ResponseErrors(response.errors)),
    }
  }
}
