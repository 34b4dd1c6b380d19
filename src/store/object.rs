// S3-compatible object store backend

use super::{account_key, check_conflict, Account, CredentialStore, StoreError, StoreResult};
use crate::provider::Provider;
use async_trait::async_trait;
use chrono::Utc;
use ring::hmac;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

/// Connection settings for an S3-compatible endpoint (AWS, MinIO, R2, ...).
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Key prefix inside the bucket, e.g. `polygate/accounts`.
    pub prefix: String,
}

/// Stores one JSON object per account under
/// `<prefix>/<provider>-<account_id>.json`, authenticated with AWS
/// Signature V4. Only the gateway process writes the bucket, so the
/// in-process write lock is enough for the conflict check.
pub struct ObjectStore {
    config: ObjectStoreConfig,
    client: reqwest::Client,
    write_lock: Mutex<()>,
}

impl ObjectStore {
    pub fn new(config: ObjectStoreConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn object_key(&self, provider: Provider, account_id: &str) -> String {
        format!("{}/{}.json", self.config.prefix.trim_end_matches('/'), account_key(provider, account_id))
    }

    fn url_for_key(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }

    async fn signed_request(
        &self,
        method: reqwest::Method,
        url: &str,
        query: &str,
        body: Vec<u8>,
    ) -> StoreResult<reqwest::Response> {
        let parsed = reqwest::Url::parse(url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| StoreError::Backend("endpoint without host".to_string()))?
            .to_string();
        let host_header = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };

        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(&body));

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\nhost;x-amz-content-sha256;x-amz-date\n{}",
            method.as_str(),
            parsed.path(),
            query,
            host_header,
            payload_hash,
            amz_date,
            payload_hash,
        );

        let scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes())),
        );

        let signature = hex::encode(sign_chain(
            &self.config.secret_access_key,
            &date_stamp,
            &self.config.region,
            &string_to_sign,
        ));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={}",
            self.config.access_key_id, scope, signature,
        );

        let full_url = if query.is_empty() {
            url.to_string()
        } else {
            format!("{}?{}", url, query)
        };

        self.client
            .request(method, &full_url)
            .header("Host", host_header)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header("Authorization", authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    async fn get_object(&self, key: &str) -> StoreResult<Option<Account>> {
        let url = self.url_for_key(key);
        let response = self
            .signed_request(reqwest::Method::GET, &url, "", Vec::new())
            .await?;

        match response.status().as_u16() {
            200 => {
                let body = response.text().await.map_err(|e| StoreError::Io(e.to_string()))?;
                let account = serde_json::from_str(&body)
                    .map_err(|e| StoreError::Backend(format!("malformed object {}: {}", key, e)))?;
                Ok(Some(account))
            }
            404 => Ok(None),
            status => Err(StoreError::Backend(format!("GET {} returned {}", key, status))),
        }
    }
}

/// AWS SigV4 key derivation chain.
fn sign_chain(secret: &str, date_stamp: &str, region: &str, string_to_sign: &str) -> Vec<u8> {
    fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, key);
        hmac::sign(&key, data).as_ref().to_vec()
    }

    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    hmac_sha256(&k_signing, string_to_sign.as_bytes())
}

/// Pull `<Key>...</Key>` values out of a ListObjectsV2 response without an
/// XML dependency; keys are bucket paths, never nested markup.
fn extract_keys(xml: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Key>") {
        let tail = &rest[start + 5..];
        match tail.find("</Key>") {
            Some(end) => {
                keys.push(tail[..end].to_string());
                rest = &tail[end + 6..];
            }
            None => break,
        }
    }
    keys
}

#[async_trait]
impl CredentialStore for ObjectStore {
    async fn list(&self) -> StoreResult<Vec<Account>> {
        let url = format!(
            "{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket
        );
        let query = format!(
            "list-type=2&prefix={}",
            urlencoding::encode(&format!("{}/", self.config.prefix.trim_end_matches('/')))
        );

        let response = self
            .signed_request(reqwest::Method::GET, &url, &query, Vec::new())
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "list returned {}",
                response.status()
            )));
        }

        let xml = response.text().await.map_err(|e| StoreError::Io(e.to_string()))?;
        let mut accounts = Vec::new();
        for key in extract_keys(&xml) {
            if !key.ends_with(".json") {
                continue;
            }
            if let Some(account) = self.get_object(&key).await? {
                accounts.push(account);
            }
        }

        accounts.sort_by(|a, b| a.key().cmp(&b.key()));
        debug!("Listed {} accounts from object store", accounts.len());
        Ok(accounts)
    }

    async fn get(&self, provider: Provider, account_id: &str) -> StoreResult<Account> {
        let key = self.object_key(provider, account_id);
        self.get_object(&key)
            .await?
            .ok_or_else(|| StoreError::not_found(provider, account_id))
    }

    async fn save(&self, mut account: Account) -> StoreResult<Account> {
        let _guard = self.write_lock.lock().await;

        let key = self.object_key(account.provider, &account.account_id);
        let existing = self.get_object(&key).await?;
        check_conflict(existing.as_ref(), &account)?;

        account.updated_at = Utc::now();
        let body = serde_json::to_vec(&account).map_err(|e| StoreError::Backend(e.to_string()))?;

        let url = self.url_for_key(&key);
        let response = self
            .signed_request(reqwest::Method::PUT, &url, "", body)
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "PUT {} returned {}",
                key,
                response.status()
            )));
        }
        Ok(account)
    }

    async fn delete(&self, provider: Provider, account_id: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let key = self.object_key(provider, account_id);
        if self.get_object(&key).await?.is_none() {
            return Err(StoreError::not_found(provider, account_id));
        }

        let url = self.url_for_key(&key);
        let response = self
            .signed_request(reqwest::Method::DELETE, &url, "", Vec::new())
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "DELETE {} returned {}",
                key,
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_listing_keys() {
        let xml = "<ListBucketResult><Contents><Key>p/a.json</Key></Contents>\
                   <Contents><Key>p/b.json</Key></Contents></ListBucketResult>";
        assert_eq!(extract_keys(xml), vec!["p/a.json", "p/b.json"]);
        assert!(extract_keys("<ListBucketResult/>").is_empty());
    }

    #[test]
    fn signing_chain_is_deterministic() {
        let a = sign_chain("secret", "20260101", "us-east-1", "payload");
        let b = sign_chain("secret", "20260101", "us-east-1", "payload");
        assert_eq!(a, b);
        let c = sign_chain("secret", "20260102", "us-east-1", "payload");
        assert_ne!(a, c);
    }
}
