use kube::ResourceExt;
use kubert::index::NamespacedRemoved;
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;

/// Wraps a shared store, counting the watch events applied to it.
#[derive(Debug)]
pub struct StoreMetrics<T> {
    inner: T,
    families: Families,
}

#[derive(Clone, Debug)]
struct Families {
    resources: Family<NamespaceKindLabels, Gauge>,
    applies: Family<NamespaceKindLabels, Counter>,
    deletes: Family<NamespaceKindLabels, Counter>,
    resets: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespaceKindLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

/// Counts the resources of kind `R` held for a namespace.
pub trait SizedIndex<R> {
    fn size(&self, namespace: &str) -> usize;
}

impl<T, R> SizedIndex<R> for Arc<RwLock<T>>
where
    T: SizedIndex<R>,
{
    fn size(&self, namespace: &str) -> usize {
        self.read().size(namespace)
    }
}

// === impl StoreMetrics ===

impl<T> StoreMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let resources = Family::default();
        prom.register(
            "resources",
            "The number of resources held in the store",
            resources.clone(),
        );

        let applies = Family::default();
        prom.register(
            "applies",
            "Count of resource updates applied to the store",
            applies.clone(),
        );

        let deletes = Family::default();
        prom.register(
            "deletes",
            "Count of resource deletions applied to the store",
            deletes.clone(),
        );

        let resets = Family::default();
        prom.register(
            "resets",
            "Count of watch resets applied to the store",
            resets.clone(),
        );

        Self {
            inner,
            families: Families {
                resources,
                applies,
                deletes,
                resets,
            },
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }
}

impl<T> StoreMetrics<Arc<RwLock<T>>> {
    fn set_size<R>(&self, namespace: String)
    where
        T: SizedIndex<R>,
        R: ResourceExt<DynamicType = ()>,
    {
        let size = self.inner.size(&namespace);
        self.families
            .resources
            .get_or_create(&NamespaceKindLabels {
                namespace,
                kind: R::kind(&()).to_string(),
            })
            .set(size as i64);
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for StoreMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let namespace = resource.namespace().unwrap_or_default();
        self.families
            .applies
            .get_or_create(&NamespaceKindLabels {
                namespace: namespace.clone(),
                kind: R::kind(&()).to_string(),
            })
            .inc();
        self.inner.write().apply(resource);
        self.set_size::<R>(namespace);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.families
            .deletes
            .get_or_create(&NamespaceKindLabels {
                namespace: namespace.clone(),
                kind: R::kind(&()).to_string(),
            })
            .inc();
        self.inner.write().delete(namespace.clone(), name);
        self.set_size::<R>(namespace);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        let mut namespaces = resources
            .iter()
            .flat_map(|r| r.namespace())
            .chain(removed.iter().map(|(namespace, _)| namespace.clone()))
            .collect::<Vec<_>>();
        namespaces.sort();
        namespaces.dedup();

        self.families
            .resets
            .get_or_create(&KindLabels {
                kind: R::kind(&()).to_string(),
            })
            .inc();
        self.inner.write().reset(resources, removed);
        for ns in namespaces {
            self.set_size::<R>(ns);
        }
    }
}
