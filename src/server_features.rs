//! Thin facade over the `ServerFeatures` service: lets a caller detect what
//! the connected node supports before relying on a feature.

use std::sync::Arc;

use tonic::Request;

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::metadata::CallOptions;
use crate::wire::server_features::server_features_client::ServerFeaturesClient;
use crate::wire::server_features::SupportedMethods;
use crate::wire::shared::Empty;

pub struct ServerFeatures {
    connection: Arc<ConnectionManager>,
}

impl ServerFeatures {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        ServerFeatures { connection }
    }

    pub async fn supported_methods(&self, call: &CallOptions) -> Result<SupportedMethods> {
        let channel = self.connection.acquire().await?;
        let mut client = ServerFeaturesClient::new(channel);
        let request = crate::metadata::apply_metadata(
            Request::new(Empty {}),
            call,
            self.connection.spec().credentials.as_ref(),
            self.connection.spec().options.node_preference,
            self.connection.spec().options.default_deadline,
        );
        client
            .get_supported_methods(request)
            .await
            .map_err(Error::from_status)
            .map(|resp| resp.into_inner())
    }
}
