#![allow(dead_code)]

use collect_service::config::{
    Config, CorsConfig, DatabaseConfig, GatewayConfig, StoreBackend, WebhookConfig,
};
use collect_service::startup::Application;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SCHOOL_ID: &str = "65b0e6293e9f76a9694d84b4";
pub const TRUSTEE_ID: &str = "65b0e552dd31950a9b41c5ba";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub client: reqwest::Client,
    pub gateway: MockServer,
    pub mongo: Option<(String, String)>,
}

fn mongo_uri() -> String {
    std::env::var("TEST_MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(StoreBackend::Memory, WebhookConfig::default()).await
    }

    pub async fn spawn_with(store: StoreBackend, webhook: WebhookConfig) -> Self {
        let gateway = MockServer::start().await;
        let db_name = format!("collect_test_{}", uuid::Uuid::new_v4());

        let config = Config {
            common: CoreConfig {
                port: 0, // Random port
                environment: "test".to_string(),
            },
            service_name: "collect-service-test".to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            store,
            database: DatabaseConfig {
                url: Secret::new(mongo_uri()),
                db_name: db_name.clone(),
            },
            gateway: GatewayConfig {
                base_url: gateway.uri(),
                api_key: Secret::new("test-api-key".to_string()),
                pg_key: Secret::new("test-pg-key".to_string()),
                school_id: SCHOOL_ID.to_string(),
                timeout_secs: 5,
            },
            webhook,
            cors: CorsConfig {
                allowed_origin: None,
            },
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            client,
            gateway,
            mongo: (store == StoreBackend::Mongo).then(|| (mongo_uri(), db_name)),
        }
    }

    /// Answer the next collect request with `collect_id`.
    pub async fn expect_collect_request(&self, collect_id: &str) {
        Mock::given(method("POST"))
            .and(path("/erp/create-collect-request"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "collect_request_id": collect_id,
                "Collect_request_url": format!("https://pay.example.com/collect/{}", collect_id),
                "sign": "response-sign"
            })))
            .up_to_n_times(1)
            .mount(&self.gateway)
            .await;
    }

    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_json(&self, path: &str) -> Value {
        let response = self.get(path).await;
        assert!(
            response.status().is_success(),
            "GET {} failed with {}",
            path,
            response.status()
        );
        response.json().await.expect("Response was not JSON")
    }

    /// Create an order through the API; the gateway assigns `collect_id`.
    pub async fn create_order(&self, collect_id: &str, amount: f64, custom_order_id: Option<&str>) {
        self.expect_collect_request(collect_id).await;
        let mut body = payment_request(amount);
        if let Some(custom) = custom_order_id {
            body["custom_order_id"] = json!(custom);
        }
        let response = self.post("/api/payments/create-payment", &body).await;
        assert_eq!(response.status().as_u16(), 200, "create-payment failed");
    }

    pub async fn deliver(&self, body: &Value) -> reqwest::Response {
        self.post("/api/payments/webhook", body).await
    }

    pub async fn cleanup(&self) {
        if let Some((uri, db_name)) = &self.mongo {
            let client = mongodb::Client::with_uri_str(uri)
                .await
                .expect("Failed to connect to MongoDB");
            client
                .database(db_name)
                .drop(None)
                .await
                .expect("Failed to drop test database");
        }
    }
}

pub fn payment_request(amount: f64) -> Value {
    json!({
        "trustee_id": TRUSTEE_ID,
        "student_info": {
            "name": "Priya Sharma",
            "id": "STU-1001",
            "email": "priya@example.com"
        },
        "gateway_name": "PhonePe",
        "amount": amount,
        "callback_url": "https://school.example.com/payments/callback"
    })
}

pub fn webhook(order_id: &str, status: &str, payment_time: &str) -> Value {
    json!({
        "status": 200,
        "order_info": {
            "order_id": order_id,
            "order_amount": 2000,
            "transaction_amount": 2200,
            "gateway": "PhonePe",
            "bank_reference": "YESBNK222",
            "status": status,
            "payment_mode": "upi",
            "payemnt_details": "success@ybl",
            "Payment_message": "payment success",
            "payment_time": payment_time,
            "error_message": "NA"
        }
    })
}
