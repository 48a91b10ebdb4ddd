//! Share and public-link propagation tests against the in-memory transport

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use stratus_client::{
    memory::Operation, ClientError, Config, Directory, File, FileSystemObject, ItemType,
    LinkExpiration, MemoryTransport, Root, SharePropagator, StratusClient,
};
use stratus_crypto::{
    symmetric::decrypt_with_key, DataKey, Decryptor, EncryptionKey, KeyHierarchy, KeyPair,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const BOB: &str = "bob@example.com";

struct Fixture {
    transport: MemoryTransport,
    owner: Arc<KeyHierarchy>,
    bob: KeyHierarchy,
    bob_id: u64,
    shares: SharePropagator,
}

fn hierarchy() -> KeyHierarchy {
    KeyHierarchy::current(3, DataKey::generate(), KeyPair::generate()).unwrap()
}

fn fixture() -> Fixture {
    let transport = MemoryTransport::new();
    let owner = Arc::new(hierarchy());
    let bob = hierarchy();
    let bob_id = transport.register_user(BOB, bob.public_key().clone());
    let shares = SharePropagator::new(Arc::new(transport.clone()), owner.clone(), 3);
    Fixture {
        transport,
        owner,
        bob,
        bob_id,
        shares,
    }
}

fn file(parent: Uuid, name: &str) -> File {
    File {
        uuid: Uuid::new_v4(),
        parent,
        name: name.to_string(),
        mime: "text/plain".to_string(),
        size: 12,
        chunks: 1,
        key: EncryptionKey::generate(),
        last_modified: 1_700_000_000_000,
        hash: None,
        bucket: Some("stratus-bucket-1".into()),
        region: Some("eu-central".into()),
    }
}

fn name_of(metadata_json: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(metadata_json).unwrap();
    value["name"].as_str().unwrap().to_string()
}

/// A directory holding two files and a subdirectory, stored on the server
fn tree(fx: &Fixture) -> (FileSystemObject, Vec<FileSystemObject>) {
    let top = Directory::new(Uuid::new_v4(), "Holiday");
    let sub = Directory::new(top.uuid, "Day 1");
    let children: Vec<FileSystemObject> = vec![
        file(top.uuid, "beach.jpg").into(),
        file(top.uuid, "notes.txt").into(),
        sub.into(),
    ];
    let top: FileSystemObject = top.into();
    fx.transport.insert_object(&top, &fx.owner).unwrap();
    for child in &children {
        fx.transport.insert_object(child, &fx.owner).unwrap();
    }
    (top, children)
}

#[test_log::test(tokio::test)]
async fn test_share_directory_reaches_every_descendant() {
    let fx = fixture();
    let (top, children) = tree(&fx);

    fx.shares
        .share_item_to_user(&top, BOB, &CancellationToken::new())
        .await
        .unwrap();

    let requests = fx.transport.share_requests();
    assert_eq!(requests.len(), 4);

    // The shared directory is top-level for the recipient; descendants keep their parent
    assert_eq!(requests[0].uuid, top.uuid());
    assert_eq!(requests[0].parent, None);
    for child in &children {
        let request = requests.iter().find(|r| r.uuid == child.uuid()).unwrap();
        assert_eq!(request.parent, child.parent());
        assert_eq!(request.email, BOB);
    }

    // Each target gets its own ciphertext, all readable with Bob's private key
    let distinct: HashSet<&str> = requests.iter().map(|r| r.metadata.as_str()).collect();
    assert_eq!(distinct.len(), 4);
    let names: HashSet<String> = requests
        .iter()
        .map(|r| name_of(&fx.bob.open_sealed(&r.metadata).unwrap()))
        .collect();
    let expected: HashSet<String> = ["Holiday", "beach.jpg", "notes.txt", "Day 1"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(names, expected);

    // The owner cannot open copies sealed for Bob
    assert!(fx.owner.open_sealed(&requests[0].metadata).is_err());
}

#[test_log::test(tokio::test)]
async fn test_share_file_sends_one_request() {
    let fx = fixture();
    let item: FileSystemObject = file(Uuid::new_v4(), "report.pdf").into();

    fx.shares
        .share_item_to_user(&item, BOB, &CancellationToken::new())
        .await
        .unwrap();

    let requests = fx.transport.share_requests();
    assert_eq!(requests.len(), 1);
    let opened = Decryptor::new(fx.bob.keypair())
        .open_str(&requests[0].metadata)
        .unwrap();
    assert_eq!(name_of(&opened), "report.pdf");
}

#[test_log::test(tokio::test)]
async fn test_rename_updates_existing_copies_only() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let original = file(Uuid::new_v4(), "draft.txt");
    let item: FileSystemObject = original.clone().into();
    fx.transport.insert_object(&item, &fx.owner).unwrap();

    fx.shares.share_item_to_user(&item, BOB, &cancel).await.unwrap();
    let link = fx
        .shares
        .public_link_item(&item, LinkExpiration::OneWeek, &cancel)
        .await
        .unwrap();
    fx.transport.clear_calls();

    // Renamed and moved in one step
    let new_parent = Uuid::new_v4();
    let renamed: FileSystemObject = File {
        name: "final.txt".into(),
        parent: new_parent,
        ..original
    }
    .into();
    fx.shares.update_shared_item(&renamed, &cancel).await.unwrap();

    assert!(fx.transport.share_requests().is_empty());
    assert!(fx.transport.link_adds().is_empty());
    let updates = fx.transport.share_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].receiver_id, fx.bob_id);
    assert_eq!(updates[0].parent, Some(new_parent));
    assert_eq!(updates[0].item_type, ItemType::File);
    let link_updates = fx.transport.link_updates();
    assert_eq!(link_updates.len(), 1);
    assert_eq!(link_updates[0].link_uuid, link.link_uuid);
    assert_eq!(link_updates[0].parent, Some(new_parent));
    assert_eq!(link_updates[0].item_type, ItemType::File);

    let shared = fx.transport.shared_copy(item.uuid(), fx.bob_id).unwrap();
    assert_eq!(name_of(&fx.bob.open_sealed(&shared).unwrap()), "final.txt");
    let linked = fx.transport.link_copy(item.uuid(), link.link_uuid).unwrap();
    assert_eq!(name_of(&decrypt_with_key(&link.key, &linked).unwrap()), "final.txt");
}

#[test_log::test(tokio::test)]
async fn test_update_is_idempotent() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let item: FileSystemObject = file(Uuid::new_v4(), "same.txt").into();
    fx.shares.share_item_to_user(&item, BOB, &cancel).await.unwrap();

    fx.shares.update_shared_item(&item, &cancel).await.unwrap();
    let first = fx.transport.shared_copy(item.uuid(), fx.bob_id).unwrap();
    fx.shares.update_shared_item(&item, &cancel).await.unwrap();
    let second = fx.transport.shared_copy(item.uuid(), fx.bob_id).unwrap();

    // Fresh ciphertext each time, same plaintext
    assert_ne!(first, second);
    assert_eq!(
        fx.bob.open_sealed(&first).unwrap(),
        fx.bob.open_sealed(&second).unwrap()
    );
    assert_eq!(fx.transport.share_updates().len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_unshared_item_update_is_a_no_op() {
    let fx = fixture();
    let item: FileSystemObject = file(Uuid::new_v4(), "private.txt").into();

    fx.shares
        .update_shared_item(&item, &CancellationToken::new())
        .await
        .unwrap();
    assert!(fx.transport.calls().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_item_in_unshared_parent_is_not_propagated() {
    let fx = fixture();
    let item: FileSystemObject = file(Uuid::new_v4(), "lonely.txt").into();

    fx.shares
        .update_item_with_maybe_shared_parent(&item, &CancellationToken::new())
        .await
        .unwrap();
    assert!(fx.transport.calls().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_new_item_joins_parent_shares_and_links() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let (top, _) = tree(&fx);
    fx.shares.share_item_to_user(&top, BOB, &cancel).await.unwrap();
    let link = fx
        .shares
        .public_link_item(&top, LinkExpiration::Never, &cancel)
        .await
        .unwrap();
    fx.transport.clear_calls();

    // A moved-in directory with one file inside
    let moved = Directory::new(top.uuid(), "Inbox");
    let inner = file(moved.uuid, "scan.png");
    let moved: FileSystemObject = moved.into();
    let inner: FileSystemObject = inner.into();
    fx.transport.insert_object(&moved, &fx.owner).unwrap();
    fx.transport.insert_object(&inner, &fx.owner).unwrap();

    fx.shares
        .update_item_with_maybe_shared_parent(&moved, &cancel)
        .await
        .unwrap();

    let requests = fx.transport.share_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].uuid, moved.uuid());
    assert_eq!(requests[0].parent, Some(top.uuid()));
    assert_eq!(requests[1].uuid, inner.uuid());
    assert_eq!(requests[1].parent, Some(moved.uuid()));

    let adds = fx.transport.link_adds();
    assert_eq!(adds.len(), 2);
    assert!(adds.iter().all(|a| a.link_uuid == link.link_uuid));
    assert!(adds.iter().all(|a| a.expiration == LinkExpiration::Never));
    let copy = fx.transport.link_copy(inner.uuid(), link.link_uuid).unwrap();
    assert_eq!(name_of(&decrypt_with_key(&link.key, &copy).unwrap()), "scan.png");
}

#[test_log::test(tokio::test)]
async fn test_public_link_for_directory() {
    let fx = fixture();
    let (top, children) = tree(&fx);

    let link = fx
        .shares
        .public_link_item(&top, LinkExpiration::OneDay, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(link.uuid, top.uuid());
    assert_eq!(name_of(&decrypt_with_key(&link.key, &link.metadata).unwrap()), "Holiday");

    let adds = fx.transport.link_adds();
    assert_eq!(adds.len(), 1 + children.len());
    assert_eq!(adds[0].uuid, top.uuid());
    assert_eq!(adds[0].parent, None);
    for add in &adds {
        assert_eq!(add.link_uuid, link.link_uuid);
        assert_eq!(add.expiration, LinkExpiration::OneDay);
        // The link key travels wrapped for the owner
        assert_eq!(fx.owner.unwrap_key(&add.key).unwrap(), link.key);
        let plain = decrypt_with_key(&link.key, &add.metadata).unwrap();
        assert!(!name_of(&plain).is_empty());
    }
}

#[test_log::test(tokio::test)]
async fn test_public_link_for_file_skips_listing() {
    let fx = fixture();
    let item: FileSystemObject = file(Uuid::new_v4(), "cv.pdf").into();

    fx.shares
        .public_link_item(&item, LinkExpiration::Never, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fx.transport.link_adds().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_root_cannot_be_shared() {
    let fx = fixture();
    let root = FileSystemObject::Root(Root {
        uuid: Uuid::new_v4(),
    });
    let cancel = CancellationToken::new();

    let err = fx.shares.share_item_to_user(&root, BOB, &cancel).await.unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedObjectVariant(_)));
    let err = fx
        .shares
        .public_link_item(&root, LinkExpiration::Never, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedObjectVariant(_)));
    let err = fx.shares.update_shared_item(&root, &cancel).await.unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedObjectVariant(_)));
    assert!(fx.transport.calls().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_failed_target_surfaces_partial_failure() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let item: FileSystemObject = file(Uuid::new_v4(), "flaky.txt").into();
    fx.shares.share_item_to_user(&item, BOB, &cancel).await.unwrap();
    fx.shares
        .public_link_item(&item, LinkExpiration::Never, &cancel)
        .await
        .unwrap();

    fx.transport.fail_always(Operation::UpdateLinkItem);
    let err = fx.shares.update_shared_item(&item, &cancel).await.unwrap_err();
    match err {
        ClientError::PropagationPartialFailure { target, source } => {
            assert!(target.starts_with("link "));
            assert!(matches!(*source, ClientError::Transport(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Re-running after the fault clears converges
    fx.transport.clear_failures();
    fx.shares.update_shared_item(&item, &cancel).await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_foreign_descendant_is_a_key_mismatch() {
    let fx = fixture();
    let top = Directory::new(Uuid::new_v4(), "Mixed");
    let stranger = hierarchy();
    let foreign: FileSystemObject = file(top.uuid, "theirs.txt").into();
    let top: FileSystemObject = top.into();
    fx.transport.insert_object(&top, &fx.owner).unwrap();
    fx.transport.insert_object(&foreign, &stranger).unwrap();

    let err = fx
        .shares
        .share_item_to_user(&top, BOB, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_key_mismatch());
}

#[test_log::test(tokio::test)]
async fn test_cancelled_propagation_sends_nothing() {
    let fx = fixture();
    let (top, _) = tree(&fx);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fx.shares.share_item_to_user(&top, BOB, &cancel).await.unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
    assert!(fx.transport.share_requests().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_client_upload_joins_shared_folder() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let folder: FileSystemObject = Directory::new(Uuid::new_v4(), "Shared").into();
    fx.transport.insert_object(&folder, &fx.owner).unwrap();
    fx.shares.share_item_to_user(&folder, BOB, &cancel).await.unwrap();
    fx.transport.clear_calls();

    let client = StratusClient::with_transport(
        Config::new("http://localhost"),
        fx.owner.clone(),
        Arc::new(fx.transport.clone()),
    )
    .unwrap();
    let uploaded = client
        .upload_file(
            stratus_client::IncompleteFile::new(folder.uuid(), "song.mp3"),
            Cursor::new(vec![7u8; 1000]),
            &cancel,
        )
        .await
        .unwrap();

    let requests = fx.transport.share_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].uuid, uploaded.uuid);
    assert_eq!(requests[0].parent, Some(folder.uuid()));
    assert_eq!(fx.transport.search_submissions().len(), 1);
}
