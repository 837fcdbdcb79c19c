//! Initialization integration tests.

#[cfg(test)]
mod tests {
    use std::io::Write;

    use objstore_core::{ConfigError, StoreError};

    use crate::{cleanup_bucket, create_test_bucket, open_store, s3_client};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_reject_unknown_option() {
        let err = open_store("any-bucket", &[("endpointUrl", "http://localhost")])
            .await
            .expect_err("unknown option");
        let err = err.downcast::<StoreError>().expect("store error");
        assert!(matches!(err, StoreError::Config(ConfigError::UnknownKey(_))));
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_open_store_with_public_url() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "public-url").await;
        let public = "https://downloads.example.com";
        let store = open_store(&bucket, &[("publicUrl", public)])
            .await
            .expect("open store");

        let signed = store
            .create_signed_url(&bucket, "k", std::time::Duration::from_secs(60))
            .await
            .expect("create_signed_url");
        let url = url::Url::parse(&signed.url).expect("valid URL");
        assert_eq!(url.host_str(), Some("downloads.example.com"));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_read_customer_key_file() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "sse-c").await;
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=").expect("write key");
        let path = file.path().to_str().expect("UTF-8 path").to_owned();

        let store = open_store(
            &bucket,
            &[
                ("serverSideEncryption", "AES256"),
                ("customerEncryptionKeyFile", path.as_str()),
            ],
        )
        .await
        .expect("open store");

        let signed = store
            .create_signed_url(&bucket, "k", std::time::Duration::from_secs(60))
            .await
            .expect("create_signed_url");
        assert_eq!(signed.headers.len(), 3);

        cleanup_bucket(&client, &bucket).await;
    }
}
