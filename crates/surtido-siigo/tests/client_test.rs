mod common;

use common::{product_json, FakeSiigo};
use surtido_siigo::{SiigoClient, SiigoError};

#[tokio::test]
async fn test_authenticates_once_and_reuses_token() {
    let siigo = FakeSiigo::start().await;
    siigo
        .state
        .products
        .lock()
        .unwrap()
        .push(product_json("p-1", "GAL-500", "Galletas 500g", 4500.0, 12));

    let client = SiigoClient::new(&siigo.config()).unwrap();
    let first = client.get_product("p-1").await.unwrap();
    let second = client.list_products(1, 10).await.unwrap();

    assert_eq!(first.code, "GAL-500");
    assert_eq!(second.results.len(), 1);
    assert_eq!(siigo.state.auth_calls(), 1);
}

#[tokio::test]
async fn test_short_lived_token_is_still_reused() {
    let siigo = FakeSiigo::start().await;
    siigo.state.set_token_lifetime(120);

    let client = SiigoClient::new(&siigo.config()).unwrap();
    client.list_products(1, 10).await.unwrap();
    client.list_products(1, 10).await.unwrap();
    client.list_customers(1, 10).await.unwrap();

    assert_eq!(siigo.state.auth_calls(), 1);
}

#[tokio::test]
async fn test_retries_server_errors_and_rate_limits() {
    let siigo = FakeSiigo::start().await;
    siigo
        .state
        .products
        .lock()
        .unwrap()
        .push(product_json("p-1", "GAL-500", "Galletas 500g", 4500.0, 12));
    siigo.state.inject(&[503, 429]);

    let client = SiigoClient::new(&siigo.config()).unwrap();
    let product = client.get_product("p-1").await.unwrap();

    assert_eq!(product.id, "p-1");
    assert_eq!(siigo.state.requests(), 3);
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let siigo = FakeSiigo::start().await;
    siigo.state.inject(&[500, 500, 500, 500, 500]);

    let client = SiigoClient::new(&siigo.config()).unwrap();
    let err = client.list_products(1, 10).await.unwrap_err();

    assert!(matches!(err, SiigoError::Server { status: 500, .. }), "{err:?}");
    // One attempt plus three retries
    assert_eq!(siigo.state.requests(), 4);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let siigo = FakeSiigo::start().await;

    let client = SiigoClient::new(&siigo.config()).unwrap();
    let err = client.get_product("missing").await.unwrap_err();

    assert!(matches!(err, SiigoError::Api { status: 404, .. }), "{err:?}");
    assert!(err.to_string().contains("product not found"));
    assert_eq!(siigo.state.requests(), 1);
}

#[tokio::test]
async fn test_reauthenticates_once_after_401() {
    let siigo = FakeSiigo::start().await;
    siigo
        .state
        .products
        .lock()
        .unwrap()
        .push(product_json("p-1", "GAL-500", "Galletas 500g", 4500.0, 12));

    let client = SiigoClient::new(&siigo.config()).unwrap();
    client.get_product("p-1").await.unwrap();

    siigo.state.revoke_token();
    client.get_product("p-1").await.unwrap();

    assert_eq!(siigo.state.auth_calls(), 2);
}

#[tokio::test]
async fn test_invoice_creation_is_not_retried_on_server_error() {
    use surtido_siigo::model::{IdRef, InvoiceCustomerRef, InvoicePaymentRequest, InvoiceRequest};

    let siigo = FakeSiigo::start().await;
    siigo.state.inject(&[502]);

    let request = InvoiceRequest {
        document: IdRef { id: 24446 },
        date: "2024-05-10".into(),
        customer: InvoiceCustomerRef {
            id: None,
            identification: "900123456".into(),
            branch_office: 0,
        },
        seller: 629,
        observations: None,
        items: Vec::new(),
        payments: vec![InvoicePaymentRequest {
            id: 5636,
            value: rust_decimal::Decimal::new(10_000, 2),
            due_date: "2024-06-09".into(),
        }],
    };

    let client = SiigoClient::new(&siigo.config()).unwrap();
    let err = client.create_invoice(&request).await.unwrap_err();

    assert!(matches!(err, SiigoError::Server { status: 502, .. }), "{err:?}");
    assert!(siigo.state.created.lock().unwrap().is_empty());
    assert_eq!(siigo.state.requests(), 1);
}
