//! Per-engine cache of project item images.
//!
//! Images may only be built on the caller's thread, so a lookup from the
//! worker hands construction to the [`Dispatcher`] and waits for the answer
//! in short slices. The wait gives up as soon as either the caller token
//! (the caller is itself blocked waiting on the worker) or the operation's
//! own token is cancelled.
use crate::cancel::CancellationToken;
use crate::dispatch::{Dispatcher, WaitOutcome};
use crate::host::{IconHandle, Image, ImageFactory, ItemId, ProjectHierarchy};
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IconKey {
    Handle(IconHandle),
    Default,
}

pub struct IconCache {
    factory: Option<Arc<dyn ImageFactory>>,
    dispatcher: Dispatcher,
    images: Mutex<HashMap<IconKey, Image>>,
    poll: Duration,
    caller_blocked: CancellationToken,
}

enum Lookup {
    Found(Image),
    Missing,
    Aborted,
}

impl IconCache {
    pub fn new(
        factory: Option<Arc<dyn ImageFactory>>,
        dispatcher: Dispatcher,
        poll: Duration,
        caller_blocked: CancellationToken,
    ) -> Self {
        Self {
            factory,
            dispatcher,
            images: Mutex::new(HashMap::new()),
            poll,
            caller_blocked,
        }
    }

    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.lock().is_empty()
    }

    /// Image for a project item, falling back to the default image.
    ///
    /// Returns `None` without an image factory, when neither image can be
    /// built, or when the wait was cancelled.
    pub fn image_for(
        &self,
        hierarchy: &dyn ProjectHierarchy,
        item: ItemId,
        cancel: &CancellationToken,
    ) -> Option<Image> {
        let factory = self.factory.as_ref()?;

        if let Some(handle) = hierarchy.icon(item) {
            let f = Arc::clone(factory);
            match self.lookup(IconKey::Handle(handle), cancel, move || f.from_icon(handle)) {
                Lookup::Found(image) => return Some(image),
                Lookup::Aborted => return None,
                Lookup::Missing => {}
            }
        }

        let f = Arc::clone(factory);
        match self.lookup(IconKey::Default, cancel, move || f.default_image()) {
            Lookup::Found(image) => Some(image),
            Lookup::Missing | Lookup::Aborted => None,
        }
    }

    fn lookup<F>(&self, key: IconKey, cancel: &CancellationToken, build: F) -> Lookup
    where
        F: FnOnce() -> Option<Image> + Send + 'static,
    {
        if let Some(image) = self.images.lock().get(&key) {
            return Lookup::Found(image.clone());
        }

        let op = match self.dispatcher.invoke(build) {
            Ok(op) => op,
            Err(e) => {
                debug!("Image construction for {key:?} not dispatched: {e}");
                return Lookup::Aborted;
            }
        };

        match op.wait(&[cancel, &self.caller_blocked], self.poll) {
            WaitOutcome::Completed(Some(image)) => {
                let mut images = self.images.lock();
                Lookup::Found(images.entry(key).or_insert(image).clone())
            }
            WaitOutcome::Completed(None) => Lookup::Missing,
            WaitOutcome::Cancelled | WaitOutcome::Abandoned => {
                debug!("Gave up waiting for image {key:?}");
                Lookup::Aborted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch;
    use crate::error::HostError;
    use crate::host::{
        HierarchyEvents, ItemInfo, MockImageFactory, ProjectId, SubscriptionCookie,
    };
    use std::path::PathBuf;
    use std::thread;

    struct IconOnly(Option<IconHandle>);

    impl ProjectHierarchy for IconOnly {
        fn id(&self) -> ProjectId {
            ProjectId(1)
        }
        fn name(&self) -> Result<String, HostError> {
            Ok("icons".into())
        }
        fn root_path(&self) -> PathBuf {
            PathBuf::from("/icons")
        }
        fn root(&self) -> ItemId {
            0
        }
        fn first_child(&self, _item: ItemId) -> Result<Option<ItemId>, HostError> {
            Ok(None)
        }
        fn next_sibling(&self, _item: ItemId) -> Result<Option<ItemId>, HostError> {
            Ok(None)
        }
        fn item(&self, item: ItemId) -> Result<ItemInfo, HostError> {
            Err(HostError::StaleNode(item))
        }
        fn icon(&self, _item: ItemId) -> Option<IconHandle> {
            self.0
        }
        fn subscribe(
            &self,
            _sink: Arc<dyn HierarchyEvents>,
        ) -> Result<SubscriptionCookie, HostError> {
            Err(HostError::Unsupported("subscribe"))
        }
        fn unsubscribe(&self, _cookie: SubscriptionCookie) -> Result<(), HostError> {
            Ok(())
        }
    }

    fn cache_with(factory: MockImageFactory) -> IconCache {
        let (dispatcher, _queue) = dispatch::channel();
        IconCache::new(
            Some(Arc::new(factory)),
            dispatcher,
            Duration::from_millis(5),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_image_cached_per_handle() {
        let mut factory = MockImageFactory::new();
        factory
            .expect_from_icon()
            .times(1)
            .returning(|handle| Some(Image::new(handle.0)));
        let cache = cache_with(factory);
        let hierarchy = IconOnly(Some(IconHandle(7)));
        let cancel = CancellationToken::new();

        let first = cache.image_for(&hierarchy, 1, &cancel).unwrap();
        let second = cache.image_for(&hierarchy, 2, &cancel).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(first.downcast_ref::<u64>(), Some(&7));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_falls_back_to_default_image() {
        let mut factory = MockImageFactory::new();
        factory.expect_from_icon().returning(|_| None);
        factory
            .expect_default_image()
            .times(1)
            .returning(|| Some(Image::new("default")));
        let cache = cache_with(factory);
        let cancel = CancellationToken::new();

        let image = cache
            .image_for(&IconOnly(Some(IconHandle(3))), 1, &cancel)
            .unwrap();
        assert_eq!(image.downcast_ref::<&str>(), Some(&"default"));
        let again = cache.image_for(&IconOnly(None), 2, &cancel).unwrap();
        assert!(image.ptr_eq(&again));
    }

    #[test]
    fn test_no_factory_means_no_image() {
        let (dispatcher, _queue) = dispatch::channel();
        let cache = IconCache::new(
            None,
            dispatcher,
            Duration::from_millis(5),
            CancellationToken::new(),
        );
        let image = cache.image_for(&IconOnly(Some(IconHandle(1))), 1, &CancellationToken::new());
        assert!(image.is_none());
    }

    #[test]
    fn test_blocked_caller_aborts_wait() {
        let mut factory = MockImageFactory::new();
        factory.expect_from_icon().never();
        factory.expect_default_image().never();

        let (dispatcher, queue) = dispatch::channel();
        let caller_blocked = CancellationToken::new();
        caller_blocked.cancel();
        let cache = Arc::new(IconCache::new(
            Some(Arc::new(factory)),
            dispatcher,
            Duration::from_millis(5),
            caller_blocked,
        ));

        let worker_cache = Arc::clone(&cache);
        let image = thread::spawn(move || {
            worker_cache.image_for(&IconOnly(Some(IconHandle(9))), 1, &CancellationToken::new())
        })
        .join()
        .unwrap();

        assert!(image.is_none());
        assert!(cache.is_empty());
        drop(queue);
    }
}
