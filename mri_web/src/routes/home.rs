use crate::{server::SharedState, templates::home_page};
use axum::{extract::State, response::Html};

pub async fn home(State(state): State<SharedState>) -> Html<String> {
    state.metrics.record_request("/");
    Html(home_page(&state.registry.descriptors()))
}
