//! Request extractors that answer failures in the API envelope

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{request::Parts, Uri},
    Json,
};
use serde::de::DeserializeOwned;

use super::response::ApiError;

/// JSON body; malformed input becomes a `VALIDATION_ERROR`
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(ApiError::validation(rejection.body_text())),
        }
    }
}

/// Query string where empty parameters (`?status=&q=`) count as absent
#[derive(Debug, Clone)]
pub struct ListQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ListQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let filtered = strip_empty_params(parts.uri.query().unwrap_or_default());
        let uri: Uri = format!("/?{}", filtered)
            .parse()
            .map_err(|_| ApiError::validation("malformed query string"))?;
        let Query(value) =
            Query::<T>::try_from_uri(&uri).map_err(|e| ApiError::validation(e.body_text()))?;
        Ok(ListQuery(value))
    }
}

fn strip_empty_params(query: &str) -> String {
    query
        .split('&')
        .filter(|pair| match pair.split_once('=') {
            Some((key, value)) => !key.is_empty() && !value.is_empty(),
            None => false,
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_empty_params() {
        assert_eq!(
            strip_empty_params("status=&q=lan&page=2&sort_by="),
            "q=lan&page=2"
        );
        assert_eq!(strip_empty_params(""), "");
        assert_eq!(strip_empty_params("flag&x=1"), "x=1");
    }
}
