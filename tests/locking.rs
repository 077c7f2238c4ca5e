mod common;

use common::*;
use http::StatusCode;

fn if_token(token: &str) -> String {
    format!("(<{token}>)")
}

#[tokio::test]
async fn exclusive_locks_exclude() {
    let h = handler();
    put(&h, "/a", "x").await;

    let r = lock(&h, "/a", "exclusive", &[]).await;
    assert_eq!(r.status, StatusCode::OK);
    let t1 = r.lock_token();
    assert!(t1.starts_with("urn:uuid:") && t1.ends_with("?=lock"), "{t1}");
    assert!(r.body.contains(&t1));
    assert!(r.body.contains("<D:lockroot><D:href>/a</D:href></D:lockroot>"), "{}", r.body);
    assert!(r.body.contains("<D:exclusive></D:exclusive>"));
    assert!(r.body.contains("mailto:tester@example.com"));

    assert_eq!(lock(&h, "/a", "exclusive", &[]).await.status, StatusCode::LOCKED);
    assert_eq!(lock(&h, "/a", "shared", &[]).await.status, StatusCode::LOCKED);

    // writes need the token.
    assert_eq!(put(&h, "/a", "y").await.status, StatusCode::LOCKED);
    let r = send(&h, "PUT", "/a", &[("if", &if_token(&t1))], "y").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert_eq!(send(&h, "DELETE", "/a", &[], "").await.status, StatusCode::LOCKED);

    let r = send(&h, "UNLOCK", "/a", &[("lock-token", &format!("<{t1}>"))], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let r = lock(&h, "/a", "exclusive", &[]).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_ne!(r.lock_token(), t1);
}

#[tokio::test]
async fn shared_locks_coexist() {
    let h = handler();
    put(&h, "/s", "x").await;

    let first = lock(&h, "/s", "shared", &[]).await;
    assert_eq!(first.status, StatusCode::OK);
    let second = lock(&h, "/s", "shared", &[]).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_ne!(first.lock_token(), second.lock_token());
    assert_eq!(lock(&h, "/s", "exclusive", &[]).await.status, StatusCode::LOCKED);

    // either token will do.
    let r = send(&h, "PUT", "/s", &[("if", &if_token(&second.lock_token()))], "y").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn lock_on_a_missing_path_creates_it() {
    let h = handler();
    let r = lock(&h, "/new", "exclusive", &[]).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let token = r.lock_token();

    assert_eq!(get(&h, "/new").await.status, StatusCode::NO_CONTENT);
    assert_eq!(put(&h, "/new", "data").await.status, StatusCode::LOCKED);
    let r = send(&h, "PUT", "/new", &[("if", &if_token(&token))], "data").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(get(&h, "/new").await.body, "data");

    assert_eq!(lock(&h, "/missing/x", "exclusive", &[]).await.status, StatusCode::CONFLICT);
    put(&h, "/file", "x").await;
    assert_eq!(lock(&h, "/file/x", "exclusive", &[]).await.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn deep_locks_cover_the_subtree() {
    let h = handler();
    mkcol(&h, "/c").await;
    put(&h, "/c/existing", "x").await;

    let r = lock(&h, "/c", "exclusive", &[("depth", "infinity")]).await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.contains("<D:depth>infinity</D:depth>"));
    let token = r.lock_token();

    assert_eq!(put(&h, "/c/new", "x").await.status, StatusCode::LOCKED);
    assert_eq!(put(&h, "/c/existing", "y").await.status, StatusCode::LOCKED);
    assert_eq!(mkcol(&h, "/c/sub").await.status, StatusCode::LOCKED);
    assert_eq!(lock(&h, "/c/existing", "shared", &[]).await.status, StatusCode::LOCKED);

    let cond = if_token(&token);
    let r = send(&h, "PUT", "/c/new", &[("if", &cond)], "x").await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = send(&h, "MKCOL", "/c/sub", &[("if", &cond)], "").await;
    assert_eq!(r.status, StatusCode::CREATED);

    // the lock is rooted at /c, unlocking a member releases it.
    let r = send(&h, "UNLOCK", "/c/new", &[("lock-token", &format!("<{token}>"))], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert_eq!(put(&h, "/c/existing", "z").await.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn shallow_locks_stay_put() {
    let h = handler();
    mkcol(&h, "/c").await;
    let r = lock(&h, "/c", "exclusive", &[("depth", "0")]).await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.contains("<D:depth>0</D:depth>"));

    // a shallow lock still guards the collection's membership.
    assert_eq!(put(&h, "/c/new", "x").await.status, StatusCode::LOCKED);
    let r = lock(&h, "/c", "exclusive", &[("depth", "1")]).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn locked_members_block_delete_and_move() {
    let h = handler();
    mkcol(&h, "/c").await;
    put(&h, "/c/f", "x").await;
    let token = lock(&h, "/c/f", "exclusive", &[]).await.lock_token();

    assert_eq!(send(&h, "DELETE", "/c", &[], "").await.status, StatusCode::LOCKED);
    let r = send(&h, "MOVE", "/c", &[("destination", "/d")], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    // locks do not travel.
    let r = send(
        &h,
        "MOVE",
        "/c",
        &[("destination", "/d"), ("if", &format!("</c/f> (<{token}>)"))],
        "",
    )
    .await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(put(&h, "/d/f", "y").await.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn refresh_needs_a_lock_and_its_token() {
    let h = handler();
    put(&h, "/a", "x").await;
    put(&h, "/plain", "x").await;

    let r = send(&h, "LOCK", "/plain", &[], "").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
    let r = send(&h, "LOCK", "/nothing", &[], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);

    let token = lock(&h, "/a", "exclusive", &[("timeout", "Second-100")])
        .await
        .lock_token();
    let r = send(&h, "LOCK", "/a", &[], "").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = send(
        &h,
        "LOCK",
        "/a",
        &[("if", &if_token(&token)), ("timeout", "Second-300")],
        "",
    )
    .await;
    assert_eq!(r.status, StatusCode::OK);
    assert!(r.body.contains("<D:timeout>Second-300</D:timeout>"), "{}", r.body);
    assert_eq!(r.lock_token(), token);
}

#[tokio::test]
async fn timeouts_are_capped() {
    init_log();
    let h = dav_store::DavHandler::builder(dav_store::Store::memory().unwrap())
        .lock_timeout(60)
        .max_lock_timeout(120)
        .build();
    put(&h, "/a", "x").await;
    put(&h, "/b", "x").await;
    put(&h, "/c", "x").await;

    let r = lock(&h, "/a", "exclusive", &[]).await;
    assert!(r.body.contains("<D:timeout>Second-60</D:timeout>"), "{}", r.body);
    let r = lock(&h, "/b", "exclusive", &[("timeout", "Second-100000")]).await;
    assert!(r.body.contains("<D:timeout>Second-120</D:timeout>"));
    let r = lock(&h, "/c", "exclusive", &[("timeout", "Infinite, Second-500")]).await;
    assert!(r.body.contains("<D:timeout>Second-120</D:timeout>"));
    let r = lock(&h, "/d", "exclusive", &[("timeout", "Second-600, Infinite, Second-30")]).await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert!(r.body.contains("<D:timeout>Second-30</D:timeout>"), "{}", r.body);
    let r = lock(&h, "/c", "exclusive", &[("timeout", "Fortnight-1")]).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unlock_checks_its_token() {
    let h = handler();
    put(&h, "/a", "x").await;
    put(&h, "/b", "x").await;
    let token = lock(&h, "/a", "exclusive", &[]).await.lock_token();

    let r = send(&h, "UNLOCK", "/a", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let r = send(&h, "UNLOCK", "/a", &[("lock-token", "<not-a-token>")], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let r = send(&h, "UNLOCK", "/b", &[("lock-token", &format!("<{token}>"))], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);
    let r = send(&h, "UNLOCK", "/a", &[("lock-token", &format!("<{token}>"))], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&h, "UNLOCK", "/a", &[("lock-token", &format!("<{token}>"))], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn if_header_entity_tags() {
    let h = handler();
    let etag = put(&h, "/a", "hello").await.header("etag").unwrap().to_string();

    let r = send(&h, "PUT", "/a", &[("if", &format!("([{etag}])"))], "v2").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    // the etag changed with the content.
    let r = send(&h, "PUT", "/a", &[("if", &format!("([{etag}])"))], "v3").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
    let r = send(&h, "PUT", "/a", &[("if", "(Not [\"E2\"])")], "v3").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&h, "PUT", "/a", &[("if", "(Not <DAV:no-lock>)")], "v4").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = send(&h, "PUT", "/a", &[("if", "(<DAV:no-lock>)")], "v5").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = send(&h, "PUT", "/a", &[("if", "(<unterminated")], "v5").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    assert_eq!(get(&h, "/a").await.body, "v4");

    // an empty list holds vacuously.
    let r = send(&h, "PUT", "/a", &[("if", "()")], "v5").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert_eq!(get(&h, "/a").await.body, "v5");
}
