//! GraphQL response rendering
//!
//! Matching is mock-level (operation name/type/field, §matching::graphql);
//! execution renders the declared body into the `data` envelope. A body
//! that already carries `data` or `errors` is passed through as the full
//! response document.

use axum::response::{IntoResponse, Json, Response};
use mockd_core::model::GraphQlMockSpec;
use mockd_core::template::{render_json, TemplateContext};
use serde_json::json;

pub async fn respond(spec: &GraphQlMockSpec, ctx: &TemplateContext<'_>) -> Response {
    let rendered = render_json(&spec.response.body, ctx).await;
    let document = match &rendered {
        serde_json::Value::Object(map) if map.contains_key("data") || map.contains_key("errors") => {
            rendered
        }
        serde_json::Value::Null => json!({"data": null}),
        other => json!({"data": other}),
    };
    Json(document).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use mockd_core::model::{GraphQlMatcher, ResponseSpec};
    use mockd_core::{Protocol, RequestSnapshot};

    async fn body_of(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 8192).await.expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn spec(body: serde_json::Value) -> GraphQlMockSpec {
        GraphQlMockSpec {
            matcher: GraphQlMatcher::default(),
            response: ResponseSpec {
                body,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn plain_body_is_wrapped_in_data() {
        let snapshot = RequestSnapshot::new(Protocol::GraphQl, "POST", "/graphql");
        let ctx = TemplateContext::for_request(&snapshot, "m1");
        let document = body_of(respond(&spec(json!({"user": {"id": 1}})), &ctx).await).await;
        assert_eq!(document["data"]["user"]["id"], 1);
    }

    #[tokio::test]
    async fn explicit_envelope_passes_through() {
        let snapshot = RequestSnapshot::new(Protocol::GraphQl, "POST", "/graphql");
        let ctx = TemplateContext::for_request(&snapshot, "m1");
        let document = body_of(
            respond(
                &spec(json!({"data": null, "errors": [{"message": "boom"}]})),
                &ctx,
            )
            .await,
        )
        .await;
        assert_eq!(document["errors"][0]["message"], "boom");
    }
}
