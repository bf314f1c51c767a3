//! HTTP surface.
//!
//! - **Triggers**
//!   - `POST   /events`: route a batch of object-creation notifications
//!   - `POST   /promotions`: promote the trailing partition now
//!
//! - **Bucket-level endpoints**
//!   - `PUT    /{bucket}`: create bucket
//!   - `DELETE /{bucket}`: delete bucket
//!
//! - **Object-level endpoints**
//!   - `PUT    /{bucket}/{*key}`: upload object (routed when upload routing is on)
//!   - `GET    /{bucket}/{*key}`: download object
//!   - `HEAD   /{bucket}/{*key}`: metadata only
//!   - `DELETE /{bucket}/{*key}`: delete object
//!
//! Static routes win over the `/{bucket}` capture, so `events` and
//! `promotions` cannot be used as bucket names through this API.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            create_bucket, delete_bucket, delete_object, get_object, head_object, upload_object,
        },
        pipeline_handlers::{promote, route_events},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/events", post(route_events))
        .route("/promotions", post(promote))
        .route(
            "/{bucket}/{*key}",
            put(upload_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        .route("/{bucket}", put(create_bucket).delete(delete_bucket))
}
