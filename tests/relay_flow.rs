//! End-to-end tests for the fetch / login / rewrite flow
//!
//! Each test runs a mock upstream site on 127.0.0.1 and a relay whose
//! websites document points at it.

use rewrite_relay::{parse_registry, Fetcher, FetcherConfig, Origin, Relay, RelayError, SessionStore};
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGGED_OUT_PAGE: &str = r#"<html><head></head><body><div class="login-banner">Sign in</div></body></html>"#;

const ACCOUNT_PAGE: &str = r#"<html><head></head><body><div id="ads">buy now</div><main><h1>Account</h1></main><nav>menu</nav></body></html>"#;

const LOGIN_FORM: &str =
    r#"<html><body><form><input name="csrf" value="abc123"><input name="user"></form></body></html>"#;

/// Relay whose only configured host is the mock server's.
fn relay_for(site_json: &str) -> Relay {
    let document = format!(r#"{{"websites": {{"127.0.0.1": {site_json}}}}}"#);
    let registry = parse_registry(&document).unwrap();
    let fetcher = Fetcher::new(Arc::new(SessionStore::new())).unwrap();
    Relay::new(registry, fetcher)
}

fn full_site(server: &MockServer) -> String {
    format!(
        r#"{{
            "login_url": "{}/login",
            "login": {{
                "user": "alice",
                "csrf": "xpath(//input[@name='csrf']/@value)"
            }},
            "not_logged_in": "xpath(//div[@class='login-banner'])",
            "strip": ["xpath(//div[@id='ads'])"],
            "move": [["xpath(//nav)", "xpath(//main/h1)", "inside-up"]]
        }}"#,
        server.uri()
    )
}

async fn mount_account_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("cookie", "session=ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ACCOUNT_PAGE))
        .with_priority(1)
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGGED_OUT_PAGE))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_logs_in_when_probe_matches_and_rewrites() {
    let server = MockServer::start().await;
    mount_account_pages(&server).await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_FORM))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("csrf=abc123"))
        .and(body_string_contains("user=alice"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=ok; Path=/"))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay_for(&full_site(&server));
    let page = relay
        .fetch_and_transform(&format!("{}/account", server.uri()))
        .await
        .unwrap();
    let html = String::from_utf8(page).unwrap();

    assert!(!html.contains("buy now"), "stripped node survived: {html}");
    assert!(
        html.contains("<main><nav>menu</nav><h1>Account</h1></main>"),
        "nav was not moved before the heading: {html}"
    );
    assert!(!html.contains("login-banner"));
}

#[tokio::test]
async fn test_login_redirect_cookies_are_replayed() {
    let server = MockServer::start().await;
    mount_account_pages(&server).await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_FORM))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/welcome")
                .insert_header("set-cookie", "session=ok; Path=/; HttpOnly"),
        )
        .expect(1)
        .mount(&server)
        .await;

    // 302 after a POST is followed with a GET
    Mock::given(method("GET"))
        .and(path("/welcome"))
        .and(header("cookie", "session=ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>welcome</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay_for(&full_site(&server));
    let page = relay
        .fetch_and_transform(&format!("{}/account", server.uri()))
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&page).contains("<h1>Account</h1>"));

    let origin = Origin::of(&Url::parse(&server.uri()).unwrap());
    assert_eq!(
        relay.fetcher().session().cookie_header(&origin).as_deref(),
        Some("session=ok")
    );
}

/// Address nothing is listening on.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn mount_logged_out_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGGED_OUT_PAGE))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_unreachable_login_page_is_an_auth_error() {
    let server = MockServer::start().await;
    mount_logged_out_page(&server).await;

    let login_url = format!("{}/login", closed_port_url());
    let site = format!(
        r#"{{
            "login_url": "{login_url}",
            "login": {{"csrf": "xpath(//input[@name='csrf']/@value)"}},
            "not_logged_in": "xpath(//div[@class='login-banner'])"
        }}"#
    );
    let relay = relay_for(&site);

    let err = relay
        .fetch_and_transform(&format!("{}/account", server.uri()))
        .await
        .unwrap_err();
    match &err {
        RelayError::AuthError { login_url: url, source } => {
            assert_eq!(url, &login_url);
            assert!(matches!(**source, RelayError::FetchError { .. }));
        }
        other => panic!("expected an auth error, got {other:?}"),
    }
    assert!(err.is_network_error());
}

#[tokio::test]
async fn test_unreachable_login_submission_is_an_auth_error() {
    let server = MockServer::start().await;
    mount_logged_out_page(&server).await;

    // Literal fields only: the first request to the login URL is the POST
    let site = format!(
        r#"{{
            "login_url": "{}/login",
            "login": {{"user": "alice"}},
            "not_logged_in": "xpath(//div[@class='login-banner'])"
        }}"#,
        closed_port_url()
    );
    let relay = relay_for(&site);

    let err = relay
        .fetch_and_transform(&format!("{}/account", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::AuthError { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_login_page_is_fetched_once_for_several_query_fields() {
    let server = MockServer::start().await;
    mount_account_pages(&server).await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><form><input name="csrf" value="abc123"><input name="nonce" value="n-42"></form></body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("csrf=abc123"))
        .and(body_string_contains("nonce=n-42"))
        .and(body_string_contains("user=alice"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=ok; Path=/"))
        .expect(1)
        .mount(&server)
        .await;

    let site = format!(
        r#"{{
            "login_url": "{}/login",
            "login": {{
                "csrf": "xpath(//input[@name='csrf']/@value)",
                "nonce": "xpath(//input[@name='nonce']/@value)",
                "user": "alice"
            }},
            "not_logged_in": "xpath(//div[@class='login-banner'])"
        }}"#,
        server.uri()
    );
    let relay = relay_for(&site);
    let page = relay
        .fetch_and_transform(&format!("{}/account", server.uri()))
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&page).contains("<h1>Account</h1>"));
}

#[tokio::test]
async fn test_unmatched_credential_query_is_sent_as_written() {
    let server = MockServer::start().await;
    mount_account_pages(&server).await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_FORM))
        .expect(1)
        .mount(&server)
        .await;

    // xpath(//input[@name='missing']/@value), form-encoded
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains(
            "token=xpath%28%2F%2Finput%5B%40name%3D%27missing%27%5D%2F%40value%29",
        ))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "session=ok; Path=/"))
        .expect(1)
        .mount(&server)
        .await;

    let site = format!(
        r#"{{
            "login_url": "{}/login",
            "login": {{"token": "xpath(//input[@name='missing']/@value)"}},
            "not_logged_in": "xpath(//div[@class='login-banner'])"
        }}"#,
        server.uri()
    );
    let relay = relay_for(&site);
    relay
        .fetch_and_transform(&format!("{}/account", server.uri()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_empty_probe_always_logs_in() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>hello</p>"))
        .expect(2)
        .mount(&server)
        .await;

    // No query credentials, so the login page is never fetched
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("user=alice"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let site = format!(
        r#"{{"login_url": "{}/login", "login": {{"user": "alice"}}, "not_logged_in": ""}}"#,
        server.uri()
    );
    let relay = relay_for(&site);
    let page = relay
        .fetch_and_transform(&format!("{}/page", server.uri()))
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&page).contains("<p>hello</p>"));
}

#[tokio::test]
async fn test_skips_login_when_probe_is_absent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ACCOUNT_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let relay = relay_for(&full_site(&server));
    let page = relay
        .fetch_and_transform(&format!("{}/account", server.uri()))
        .await
        .unwrap();
    let html = String::from_utf8(page).unwrap();
    assert!(!html.contains("buy now"));
    assert!(html.contains("<nav>menu</nav><h1>Account</h1>"));
}

#[tokio::test]
async fn test_unconfigured_host_is_relayed_verbatim() {
    let server = MockServer::start().await;
    let raw = "<p>unclosed <b>markup\n<script>keep()</script>";

    Mock::given(method("GET"))
        .and(path("/raw"))
        .respond_with(ResponseTemplate::new(200).set_body_string(raw))
        .mount(&server)
        .await;

    let registry = parse_registry(
        r#"{"websites": {"other.example": {"login_url": "https://other.example/login", "strip": ["//script"]}}}"#,
    )
    .unwrap();
    let relay = Relay::new(registry, Fetcher::new(Arc::new(SessionStore::new())).unwrap());

    let page = relay
        .fetch_and_transform(&format!("{}/raw", server.uri()))
        .await
        .unwrap();
    assert_eq!(page, raw.as_bytes());
}

#[tokio::test]
async fn test_upstream_error_status_is_still_relayed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("<h1>Not Found</h1>"))
        .mount(&server)
        .await;

    let relay = relay_for(
        &format!(r#"{{"login_url": "{}/login", "not_logged_in": "//form[@id='login']"}}"#, server.uri()),
    );
    let page = relay
        .fetch_and_transform(&format!("{}/gone", server.uri()))
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&page).contains("<h1>Not Found</h1>"));
}

#[tokio::test]
async fn test_connection_refused_is_a_fetch_error() {
    let registry = parse_registry(r#"{"websites": {}}"#).unwrap();
    let relay = Relay::new(registry, Fetcher::new(Arc::new(SessionStore::new())).unwrap());

    let err = relay
        .fetch_and_transform(&format!("{}/", closed_port_url()))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::FetchError { .. }));
    assert!(err.is_network_error());
}

#[tokio::test]
async fn test_invalid_targets_are_client_errors() {
    let registry = parse_registry(r#"{"websites": {}}"#).unwrap();
    let relay = Relay::new(registry, Fetcher::new(Arc::new(SessionStore::new())).unwrap());

    for target in ["", "not a url", "ftp://example.com/file"] {
        let err = relay.fetch_and_transform(target).await.unwrap_err();
        assert!(err.is_client_error(), "{target:?} gave {err:?}");
    }
}

#[tokio::test]
async fn test_redirect_loops_are_cut_off() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
        .mount(&server)
        .await;

    let config = FetcherConfig {
        max_redirects: 3,
        ..Default::default()
    };
    let fetcher = Fetcher::with_config(config, Arc::new(SessionStore::new())).unwrap();
    let url = Url::parse(&format!("{}/loop", server.uri())).unwrap();

    let err = fetcher.get(&url).await.unwrap_err();
    assert!(matches!(err, RelayError::TooManyRedirects { hops: 3, .. }));
}

#[tokio::test]
async fn test_cookies_stay_with_their_origin() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/set"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "token=first"))
        .mount(&first)
        .await;

    let session = Arc::new(SessionStore::new());
    let fetcher = Fetcher::new(session.clone()).unwrap();
    fetcher
        .get(&Url::parse(&format!("{}/set", first.uri())).unwrap())
        .await
        .unwrap();

    let first_origin = Origin::of(&Url::parse(&first.uri()).unwrap());
    let second_origin = Origin::of(&Url::parse(&second.uri()).unwrap());
    assert_eq!(session.cookie_header(&first_origin).as_deref(), Some("token=first"));
    assert_eq!(session.cookie_header(&second_origin), None);
}
