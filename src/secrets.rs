/*!
Credential lookup

Api keys live in google secret manager in production. Locally they can be
provided through the environment instead, `spotify_clientid` being read
from `SPOTIFY_CLIENTID` and so on.
*/
use crate::{Error, Result, CONFIG, LOG};

pub const SPOTIFY_CLIENT_ID: &str = "spotify_clientid";
pub const SPOTIFY_SECRET: &str = "spotify_secret";
pub const SETLISTFM_KEY: &str = "setlistfm";
pub const GOOGLE_MAPS_KEY: &str = "google_maps";

#[async_trait::async_trait]
pub trait SecretAccessor: Send + Sync {
    async fn access_secret_version(&self, secret_id: &str, version_id: &str) -> Result<String>;

    async fn latest(&self, secret_id: &str) -> Result<String> {
        self.access_secret_version(secret_id, "latest").await
    }
}

/// Environment variable a secret is read from
pub fn secret_env_name(secret_id: &str, version_id: &str) -> String {
    let mut name: String = secret_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if version_id != "latest" {
        name.push('_');
        name.push_str(&version_id.to_ascii_uppercase());
    }
    name
}

pub struct EnvSecrets;

#[async_trait::async_trait]
impl SecretAccessor for EnvSecrets {
    async fn access_secret_version(&self, secret_id: &str, version_id: &str) -> Result<String> {
        let name = secret_env_name(secret_id, version_id);
        std::env::var(&name)
            .map_err(|_| Error::NotFound(format!("secret {} (env {})", secret_id, name)))
    }
}

#[derive(serde::Deserialize)]
struct AccessResponse {
    payload: Payload,
}

#[derive(serde::Deserialize)]
struct Payload {
    // base64 of the secret's bytes
    data: String,
}

#[derive(serde::Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// Google secret manager over its rest api
pub struct GcpSecretManager {
    project: String,
    api_url: String,
    metadata_url: String,
}

impl GcpSecretManager {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            api_url: "https://secretmanager.googleapis.com/v1".to_string(),
            metadata_url: "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token".to_string(),
        }
    }

    /// An oauth token for the runtime's service account, taken from
    /// `GCP_ACCESS_TOKEN` when set and the metadata server otherwise
    async fn access_token(&self) -> Result<String> {
        if let Ok(token) = std::env::var("GCP_ACCESS_TOKEN") {
            return Ok(token);
        }
        let mut resp = surf::get(&self.metadata_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("metadata token error {:?}", e)))?;
        if !resp.status().is_success() {
            return Err(crate::error::from_status(resp.status(), "metadata token"));
        }
        let token: MetadataToken = resp
            .body_json()
            .await
            .map_err(|e| Error::Unavailable(format!("metadata token json error {}", e)))?;
        Ok(token.access_token)
    }

    pub fn version_name(&self, secret_id: &str, version_id: &str) -> String {
        format!(
            "projects/{}/secrets/{}/versions/{}",
            self.project, secret_id, version_id
        )
    }
}

fn decode_payload(resp: AccessResponse) -> Result<String> {
    let bytes =
        base64::decode(&resp.payload.data).map_err(|e| se!("secret payload decode error {}", e))?;
    String::from_utf8(bytes).map_err(|e| se!("secret payload utf8 error {}", e))
}

#[async_trait::async_trait]
impl SecretAccessor for GcpSecretManager {
    async fn access_secret_version(&self, secret_id: &str, version_id: &str) -> Result<String> {
        let name = self.version_name(secret_id, version_id);
        let token = self.access_token().await?;
        let mut resp = surf::get(format!("{}/{}:access", self.api_url, name))
            .header("authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("secret {} access error {:?}", name, e)))?;
        if !resp.status().is_success() {
            return Err(crate::error::from_status(resp.status(), &name));
        }
        let body: AccessResponse = resp
            .body_json()
            .await
            .map_err(|e| Error::Unavailable(format!("secret {} json error {}", name, e)))?;
        slog::debug!(LOG, "accessed secret"; "name" => &name);
        decode_payload(body)
    }
}

pub fn from_config() -> anyhow::Result<Box<dyn SecretAccessor>> {
    match CONFIG.secrets_backend.as_str() {
        "gcp" => Ok(Box::new(GcpSecretManager::new(&CONFIG.gcp_project))),
        "env" => Ok(Box::new(EnvSecrets)),
        other => anyhow::bail!("unknown SECRETS_BACKEND {:?}", other),
    }
}

/// Third party api credentials, resolved once at startup
#[derive(Clone)]
pub struct Credentials {
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub setlistfm_api_key: String,
    pub google_maps_key: String,
}

impl Credentials {
    pub async fn load(accessor: &dyn SecretAccessor) -> Result<Self> {
        let creds = Self {
            spotify_client_id: accessor.latest(SPOTIFY_CLIENT_ID).await?,
            spotify_client_secret: accessor.latest(SPOTIFY_SECRET).await?,
            setlistfm_api_key: accessor.latest(SETLISTFM_KEY).await?,
            google_maps_key: accessor.latest(GOOGLE_MAPS_KEY).await?,
        };
        slog::info!(LOG, "loaded credentials"; "backend" => &CONFIG.secrets_backend);
        Ok(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_names() {
        assert_eq!(secret_env_name("spotify_clientid", "latest"), "SPOTIFY_CLIENTID");
        assert_eq!(secret_env_name("google-maps", "3"), "GOOGLE_MAPS_3");
    }

    #[async_std::test]
    async fn env_secrets_read_versions() {
        std::env::set_var("TOURBUS_TEST_KEY", "latest-value");
        std::env::set_var("TOURBUS_TEST_KEY_2", "v2-value");
        let s = EnvSecrets;
        assert_eq!(s.latest("tourbus_test_key").await.unwrap(), "latest-value");
        assert_eq!(
            s.access_secret_version("tourbus_test_key", "2").await.unwrap(),
            "v2-value"
        );
        assert!(matches!(
            s.latest("tourbus_missing_key").await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn payload_decodes() {
        let resp: AccessResponse = serde_json::from_value(serde_json::json!({
            "name": "projects/p/secrets/setlistfm/versions/1",
            "payload": {"data": base64::encode("abc-123"), "dataCrc32c": "1"}
        }))
        .unwrap();
        assert_eq!(decode_payload(resp).unwrap(), "abc-123");
    }

    #[test]
    fn version_names() {
        let gcp = GcpSecretManager::new("tourbus-407014");
        assert_eq!(
            gcp.version_name("google_maps", "latest"),
            "projects/tourbus-407014/secrets/google_maps/versions/latest"
        );
    }

    struct Fixed;

    #[async_trait::async_trait]
    impl SecretAccessor for Fixed {
        async fn access_secret_version(&self, secret_id: &str, version_id: &str) -> Result<String> {
            Ok(format!("{}@{}", secret_id, version_id))
        }
    }

    #[async_std::test]
    async fn credentials_use_latest_versions() {
        let creds = Credentials::load(&Fixed).await.unwrap();
        assert_eq!(creds.spotify_client_id, "spotify_clientid@latest");
        assert_eq!(creds.spotify_client_secret, "spotify_secret@latest");
        assert_eq!(creds.setlistfm_api_key, "setlistfm@latest");
        assert_eq!(creds.google_maps_key, "google_maps@latest");
    }
}
