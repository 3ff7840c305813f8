//! In-memory object store
//!
//! Backs tests and the offline phase of node startup. Several stores sharing
//! a [`MemoryBus`] see each other's topic publishes, which is enough to
//! exercise fan-out, ancestor fetching, and cafe fallback without a network.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::{multihash, Directory, Link, ObjectError, ObjectNode, ObjectStore};

/// Topic channel capacity per subscriber
const TOPIC_CAPACITY: usize = 64;

/// A stored object: raw blob or directory node
#[derive(Debug, Clone)]
enum StoredObject {
    Blob(Vec<u8>),
    Dir(Vec<Link>),
}

/// Shared pub/sub bus connecting a set of in-memory stores
#[derive(Default)]
pub struct MemoryBus {
    topics: Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>,
    /// Objects visible to every store on the bus (models network retrieval)
    shared: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn subscribe(&self, topic: &str) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(TOPIC_CAPACITY);
        self.topics
            .lock()
            .expect("bus lock")
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Deliver to live subscribers, pruning closed ones. Returns how many
    /// subscribers received the payload.
    fn publish(&self, topic: &str, data: &[u8]) -> usize {
        let mut topics = self.topics.lock().expect("bus lock");
        let Some(subscribers) = topics.get_mut(topic) else {
            return 0;
        };
        subscribers.retain(|tx| !tx.is_closed());
        let mut delivered = 0;
        for tx in subscribers.iter() {
            if tx.try_send(data.to_vec()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// An in-memory [`ObjectStore`]
pub struct MemoryStore {
    local_id: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    pins: Mutex<HashSet<String>>,
    bus: Arc<MemoryBus>,
    online: Mutex<bool>,
}

impl MemoryStore {
    /// A store wired to a shared bus
    pub fn new(local_id: &str, bus: Arc<MemoryBus>) -> Arc<Self> {
        Arc::new(Self {
            local_id: local_id.to_string(),
            objects: Mutex::new(HashMap::new()),
            pins: Mutex::new(HashSet::new()),
            bus,
            online: Mutex::new(true),
        })
    }

    /// A solitary store with a private bus
    pub fn standalone(local_id: &str) -> Arc<Self> {
        Self::new(local_id, MemoryBus::new())
    }

    /// Toggle network availability; offline stores refuse publish/subscribe
    pub fn set_online(&self, online: bool) {
        *self.online.lock().expect("online lock") = online;
    }

    /// Whether an id is pinned (test inspection)
    pub fn is_pinned(&self, id: &str) -> bool {
        self.pins.lock().expect("pins lock").contains(id)
    }

    fn get_object(&self, id: &str) -> Result<StoredObject, ObjectError> {
        if let Some(obj) = self.objects.lock().expect("objects lock").get(id) {
            return Ok(obj.clone());
        }
        // Fall back to the bus: objects added by peers are retrievable
        if let Some(obj) = self.bus.shared.lock().expect("shared lock").get(id) {
            let obj = obj.clone();
            self.objects
                .lock()
                .expect("objects lock")
                .insert(id.to_string(), obj.clone());
            return Ok(obj);
        }
        Err(ObjectError::NotFound(id.to_string()))
    }

    fn put_object(&self, id: &str, obj: StoredObject) {
        self.objects
            .lock()
            .expect("objects lock")
            .insert(id.to_string(), obj.clone());
        self.bus
            .shared
            .lock()
            .expect("shared lock")
            .insert(id.to_string(), obj);
    }

    fn object_size(&self, id: &str) -> Result<u64, ObjectError> {
        match self.get_object(id)? {
            StoredObject::Blob(data) => Ok(data.len() as u64),
            StoredObject::Dir(links) => Ok(links.iter().map(|l| l.size).sum()),
        }
    }

    /// Resolve a `<hash>[/<name>...]` path to an object id
    fn resolve_path(&self, path: &str) -> Result<String, ObjectError> {
        let mut parts = path.trim_matches('/').split('/');
        let mut current = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ObjectError::InvalidPath(path.to_string()))?
            .to_string();

        for name in parts {
            match self.get_object(&current)? {
                StoredObject::Dir(links) => {
                    let link = links
                        .iter()
                        .find(|l| l.name == name)
                        .ok_or_else(|| ObjectError::NotFound(format!("{}/{}", current, name)))?;
                    current = link.id.clone();
                }
                StoredObject::Blob(_) => {
                    return Err(ObjectError::InvalidPath(path.to_string()));
                }
            }
        }
        Ok(current)
    }
}

impl ObjectStore for MemoryStore {
    fn local_id(&self) -> String {
        self.local_id.clone()
    }

    fn add_bytes(&self, data: &[u8], pin: bool) -> Result<String, ObjectError> {
        let id = multihash(data);
        self.put_object(&id, StoredObject::Blob(data.to_vec()));
        if pin {
            self.pins.lock().expect("pins lock").insert(id.clone());
        }
        Ok(id)
    }

    fn add_link_to_dir(
        &self,
        dir: &mut Directory,
        name: &str,
        child: &str,
    ) -> Result<(), ObjectError> {
        let size = self.object_size(child)?;
        dir.links.push(Link {
            name: name.to_string(),
            id: child.to_string(),
            size,
        });
        Ok(())
    }

    fn finalize_dir(&self, dir: Directory, pin: bool) -> Result<ObjectNode, ObjectError> {
        let mut links = dir.links.clone();
        links.sort_by(|a, b| a.name.cmp(&b.name));
        let id = multihash(&dir.canonical_bytes());
        self.put_object(&id, StoredObject::Dir(links.clone()));
        if pin {
            self.pins.lock().expect("pins lock").insert(id.clone());
        }
        Ok(ObjectNode { id, links })
    }

    fn pin(&self, id: &str, recursive: bool) -> Result<(), ObjectError> {
        let obj = self.get_object(id)?;
        self.pins.lock().expect("pins lock").insert(id.to_string());
        if recursive {
            if let StoredObject::Dir(links) = obj {
                for link in links {
                    self.pin(&link.id, true)?;
                }
            }
        }
        Ok(())
    }

    fn unpin_path(&self, path: &str) -> Result<(), ObjectError> {
        let id = self.resolve_path(path)?;
        self.pins.lock().expect("pins lock").remove(&id);
        Ok(())
    }

    fn data_at_path(&self, path: &str) -> Result<Vec<u8>, ObjectError> {
        let id = self.resolve_path(path)?;
        match self.get_object(&id)? {
            StoredObject::Blob(data) => Ok(data),
            StoredObject::Dir(_) => Err(ObjectError::InvalidPath(path.to_string())),
        }
    }

    fn links_at_path(&self, path: &str) -> Result<Vec<Link>, ObjectError> {
        let id = self.resolve_path(path)?;
        match self.get_object(&id)? {
            StoredObject::Dir(links) => Ok(links),
            StoredObject::Blob(_) => Err(ObjectError::InvalidPath(path.to_string())),
        }
    }

    fn node_at_link(&self, link: &Link) -> Result<ObjectNode, ObjectError> {
        match self.get_object(&link.id)? {
            StoredObject::Dir(links) => Ok(ObjectNode {
                id: link.id.clone(),
                links,
            }),
            StoredObject::Blob(_) => Err(ObjectError::InvalidPath(link.id.clone())),
        }
    }

    fn publish(&self, topic: &str, data: &[u8]) -> Result<(), ObjectError> {
        if !*self.online.lock().expect("online lock") {
            return Err(ObjectError::Offline);
        }
        if self.bus.publish(topic, data) == 0 {
            return Err(ObjectError::Unreachable(topic.to_string()));
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> mpsc::Receiver<Vec<u8>> {
        self.bus.subscribe(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_fetch_bytes() {
        let store = MemoryStore::standalone("n1");
        let id = store.add_bytes(b"hello", false).unwrap();
        assert_eq!(id, multihash(b"hello"));
        assert_eq!(store.data_at_path(&id).unwrap(), b"hello");
    }

    #[test]
    fn test_missing_object() {
        let store = MemoryStore::standalone("n1");
        assert!(matches!(
            store.data_at_path("nope"),
            Err(ObjectError::NotFound(_))
        ));
    }

    #[test]
    fn test_pin_flag() {
        let store = MemoryStore::standalone("n1");
        let pinned = store.add_bytes(b"keep", true).unwrap();
        let loose = store.add_bytes(b"drop", false).unwrap();
        assert!(store.is_pinned(&pinned));
        assert!(!store.is_pinned(&loose));

        store.unpin_path(&pinned).unwrap();
        assert!(!store.is_pinned(&pinned));
    }

    #[test]
    fn test_directory_build_and_resolve() {
        let store = MemoryStore::standalone("n1");
        let mut dir = store.new_directory();
        store.add_bytes_to_dir(&mut dir, "f", b"metadata").unwrap();
        let content = store.add_bytes(b"content", false).unwrap();
        store.add_link_to_dir(&mut dir, "d", &content).unwrap();
        let node = store.finalize_dir(dir, true).unwrap();

        assert_eq!(node.links.len(), 2);
        assert_eq!(store.data_at_path(&format!("{}/f", node.id)).unwrap(), b"metadata");
        assert_eq!(store.data_at_path(&format!("{}/d", node.id)).unwrap(), b"content");

        let links = store.links_at_path(&node.id).unwrap();
        assert_eq!(links, node.links);

        let d = store.resolve_link(&node, "d").unwrap();
        assert_eq!(d.id, content);
        assert!(store.resolve_link(&node, "missing").is_none());
    }

    #[test]
    fn test_directory_id_deterministic() {
        let store = MemoryStore::standalone("n1");
        let a_id = store.add_bytes(b"a", false).unwrap();
        let b_id = store.add_bytes(b"b", false).unwrap();

        let mut d1 = store.new_directory();
        store.add_link_to_dir(&mut d1, "a", &a_id).unwrap();
        store.add_link_to_dir(&mut d1, "b", &b_id).unwrap();

        let mut d2 = store.new_directory();
        store.add_link_to_dir(&mut d2, "b", &b_id).unwrap();
        store.add_link_to_dir(&mut d2, "a", &a_id).unwrap();

        assert_eq!(
            store.finalize_dir(d1, false).unwrap().id,
            store.finalize_dir(d2, false).unwrap().id
        );
    }

    #[test]
    fn test_recursive_pin() {
        let store = MemoryStore::standalone("n1");
        let blob = store.add_bytes(b"inner", false).unwrap();
        let mut dir = store.new_directory();
        store.add_link_to_dir(&mut dir, "x", &blob).unwrap();
        let node = store.finalize_dir(dir, false).unwrap();

        store.pin(&node.id, true).unwrap();
        assert!(store.is_pinned(&blob));
    }

    #[test]
    fn test_bus_object_retrieval() {
        let bus = MemoryBus::new();
        let a = MemoryStore::new("a", bus.clone());
        let b = MemoryStore::new("b", bus);

        let id = a.add_bytes(b"shared data", false).unwrap();
        assert_eq!(b.data_at_path(&id).unwrap(), b"shared data");
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = MemoryBus::new();
        let a = MemoryStore::new("a", bus.clone());
        let b = MemoryStore::new("b", bus);

        let mut rx = b.subscribe("b-topic");
        a.publish("b-topic", b"ping").unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"ping");
    }

    #[test]
    fn test_publish_without_listener_unreachable() {
        let store = MemoryStore::standalone("a");
        assert!(matches!(
            store.publish("nobody", b"ping"),
            Err(ObjectError::Unreachable(_))
        ));
    }

    #[test]
    fn test_publish_offline() {
        let bus = MemoryBus::new();
        let a = MemoryStore::new("a", bus.clone());
        let b = MemoryStore::new("b", bus);
        let _rx = b.subscribe("t");

        a.set_online(false);
        assert_eq!(a.publish("t", b"x"), Err(ObjectError::Offline));
        a.set_online(true);
        a.publish("t", b"x").unwrap();
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let bus = MemoryBus::new();
        let a = MemoryStore::new("a", bus.clone());
        let b = MemoryStore::new("b", bus);

        let rx = b.subscribe("t");
        drop(rx);
        assert!(matches!(
            a.publish("t", b"x"),
            Err(ObjectError::Unreachable(_))
        ));
    }
}
