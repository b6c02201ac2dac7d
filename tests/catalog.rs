mod common;

use std::sync::Arc;

use assert_fs::TempDir;
use assert_fs::prelude::*;
use mvsearch::config::{BuildOptions, DataDir};
use mvsearch::index::IndexBackend;
use mvsearch::{Catalog, Error, StalePolicy};
use rstest::*;

use common::*;

struct Fixture {
    data: TempDir,
    gallery: TempDir,
}

#[fixture]
fn fixture() -> Fixture {
    let gallery = TempDir::new().unwrap();
    gallery.child("a.jpg").write_binary(b"image-a").unwrap();
    gallery.child("b.jpg").write_binary(b"image-b").unwrap();
    Fixture { data: TempDir::new().unwrap(), gallery }
}

fn catalog(f: &Fixture, summarizer: Arc<TableSummarizer>, stale: StalePolicy) -> Catalog {
    let (providers, _) = providers(summarizer);
    let options = BuildOptions { backend: IndexBackend::Flat, concurrency: 2, stale, ..Default::default() };
    Catalog::new(DataDir::new(f.data.path()), providers).with_options(options)
}

#[rstest]
#[tokio::test]
async fn second_catalog_loads_without_summarizing(fixture: Fixture) {
    let first = Arc::new(pets());
    let built = catalog(&fixture, first.clone(), StalePolicy::Warn)
        .get_or_build_retriever(Some(fixture.gallery.path()), "pets")
        .await
        .unwrap();
    assert_eq!(first.calls(), 4);

    let second = Arc::new(pets());
    let loaded = catalog(&fixture, second.clone(), StalePolicy::Warn)
        .get_or_build_retriever(Some(fixture.gallery.path()), "pets")
        .await
        .unwrap();
    assert_eq!(second.calls(), 0);
    assert_eq!(loaded.store().keys().collect::<Vec<_>>(), built.store().keys().collect::<Vec<_>>());

    let result = loaded.query("cat", 1).await.unwrap();
    assert_eq!(result[0].document.source.as_deref(), Some("a.jpg"));
}

#[rstest]
#[tokio::test]
async fn resident_retriever_is_reused(fixture: Fixture) {
    let catalog = catalog(&fixture, Arc::new(pets()), StalePolicy::Warn);
    let a = catalog.get_or_build_retriever(Some(fixture.gallery.path()), "pets").await.unwrap();
    let b = catalog.get_or_build_retriever(None, "pets").await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(catalog.resident().await, vec!["pets"]);
}

#[rstest]
#[tokio::test]
async fn missing_collection_without_gallery(fixture: Fixture) {
    let catalog = catalog(&fixture, Arc::new(pets()), StalePolicy::Warn);
    let result = catalog.get_or_build_retriever(None, "pets").await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[rstest]
#[tokio::test]
async fn rebuild_swaps_resident_retriever(fixture: Fixture) {
    let catalog = catalog(&fixture, Arc::new(pets()), StalePolicy::Warn);
    let old = catalog.get_or_build_retriever(Some(fixture.gallery.path()), "pets").await.unwrap();

    fixture.gallery.child("c.jpg").write_binary(b"image-c").unwrap();
    let new = catalog.rebuild(fixture.gallery.path(), "pets").await.unwrap();

    // 旧的引用仍然可用
    assert_eq!(old.store().len(), 2);
    assert_eq!(new.store().len(), 3);
    let current = catalog.get_or_build_retriever(None, "pets").await.unwrap();
    assert!(Arc::ptr_eq(&current, &new));
}

#[rstest]
#[case::warn(StalePolicy::Warn, 2)]
#[case::ignore(StalePolicy::Ignore, 2)]
#[case::rebuild(StalePolicy::Rebuild, 3)]
#[tokio::test]
async fn stale_gallery(fixture: Fixture, #[case] policy: StalePolicy, #[case] documents: usize) {
    catalog(&fixture, Arc::new(pets()), policy)
        .get_or_build_retriever(Some(fixture.gallery.path()), "pets")
        .await
        .unwrap();
    fixture.gallery.child("c.jpg").write_binary(b"image-c").unwrap();

    let retriever = catalog(&fixture, Arc::new(pets()), policy)
        .get_or_build_retriever(Some(fixture.gallery.path()), "pets")
        .await
        .unwrap();
    assert_eq!(retriever.store().len(), documents);
}

#[rstest]
#[tokio::test]
async fn empty_gallery_is_rejected(fixture: Fixture) {
    let empty = TempDir::new().unwrap();
    let catalog = catalog(&fixture, Arc::new(pets()), StalePolicy::Warn);
    let result = catalog.get_or_build_retriever(Some(empty.path()), "empty").await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert!(catalog.list().await.unwrap().is_empty());
}

#[rstest]
#[tokio::test]
async fn list_and_delete(fixture: Fixture) {
    let catalog = catalog(&fixture, Arc::new(pets()), StalePolicy::Warn);
    catalog.get_or_build_retriever(Some(fixture.gallery.path()), "pets").await.unwrap();
    catalog.get_or_build_retriever(Some(fixture.gallery.path()), "animals").await.unwrap();
    assert_eq!(catalog.list().await.unwrap(), vec!["animals", "pets"]);

    catalog.delete("pets").await.unwrap();
    assert_eq!(catalog.list().await.unwrap(), vec!["animals"]);
    assert_eq!(catalog.resident().await, vec!["animals"]);
    assert!(matches!(catalog.delete("pets").await, Err(Error::NotFound(_))));
}

#[rstest]
#[tokio::test]
async fn invalid_name(fixture: Fixture) {
    let catalog = catalog(&fixture, Arc::new(pets()), StalePolicy::Warn);
    let result = catalog.get_or_build_retriever(Some(fixture.gallery.path()), "../escape").await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_loads(fixture: Fixture) {
    catalog(&fixture, Arc::new(pets()), StalePolicy::Warn)
        .get_or_build_retriever(Some(fixture.gallery.path()), "pets")
        .await
        .unwrap();

    for _ in 0..10 {
        let shared = Arc::new(catalog(&fixture, Arc::new(pets()), StalePolicy::Warn));
        let tasks = (0..8)
            .map(|_| {
                let shared = shared.clone();
                tokio::spawn(async move { shared.get_or_build_retriever(None, "pets").await })
            })
            .collect::<Vec<_>>();

        let mut loaded = vec![];
        for task in tasks {
            loaded.push(task.await.unwrap().unwrap());
        }
        assert!(loaded.iter().all(|r| Arc::ptr_eq(r, &loaded[0])));
        assert_eq!(loaded[0].store().len(), 2);
    }
}
