use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use thiserror::Error;

/// 容器中保存的服务实例。
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// 惰性创建服务的工厂闭包。
pub type ServiceFactoryFn =
    Arc<dyn Fn(&ServiceProvider) -> Result<ServiceInstance, ServiceError> + Send + Sync>;

/// 服务注册或解析阶段的错误。
#[derive(Debug, Error)]
pub enum ServiceError {
    /// 请求的契约没有任何注册。
    #[error("service `{contract}` is not registered")]
    NotRegistered { contract: &'static str },
    /// 工厂构造实例失败。
    #[error("failed to construct service `{contract}`: {reason}")]
    Construction {
        contract: &'static str,
        reason: String,
    },
}

impl ServiceError {
    /// 工厂内部使用的便捷构造函数。
    pub fn construction(contract: &'static str, reason: impl fmt::Display) -> Self {
        Self::Construction {
            contract,
            reason: reason.to_string(),
        }
    }
}

/// 服务生命周期。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceLifetime {
    /// 首次解析时创建并缓存，之后复用同一实例。
    Singleton,
    /// 每次解析都调用工厂创建新实例。
    Transient,
}

/// 服务注册项，封装直接实例或惰性工厂的两种形态。
#[derive(Clone)]
pub enum ServiceEntry {
    /// 立即可用的实例。
    Instance(ServiceInstance),
    /// 延迟创建的工厂。
    Factory(ServiceFactoryFn),
}

impl fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceEntry::Instance(_) => f.debug_tuple("ServiceEntry::Instance").finish(),
            ServiceEntry::Factory(_) => f.debug_tuple("ServiceEntry::Factory").finish(),
        }
    }
}

/// 单条服务描述：契约类型、生命周期与注册项。
#[derive(Clone, Debug)]
pub struct ServiceDescriptor {
    contract: TypeId,
    contract_name: &'static str,
    lifetime: ServiceLifetime,
    entry: ServiceEntry,
}

impl ServiceDescriptor {
    /// 以现成实例描述一个单例服务。
    pub fn singleton<T>(value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self {
            contract: TypeId::of::<T>(),
            contract_name: type_name::<T>(),
            lifetime: ServiceLifetime::Singleton,
            entry: ServiceEntry::Instance(Arc::new(value)),
        }
    }

    /// 以工厂描述一个服务。
    pub fn factory<T, F>(lifetime: ServiceLifetime, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<T, ServiceError> + Send + Sync + 'static,
    {
        let factory: ServiceFactoryFn = Arc::new(move |provider: &ServiceProvider| {
            factory(provider).map(|value| Arc::new(value) as ServiceInstance)
        });
        Self {
            contract: TypeId::of::<T>(),
            contract_name: type_name::<T>(),
            lifetime,
            entry: ServiceEntry::Factory(factory),
        }
    }

    pub fn contract(&self) -> TypeId {
        self.contract
    }

    pub fn contract_name(&self) -> &'static str {
        self.contract_name
    }

    pub fn lifetime(&self) -> ServiceLifetime {
        self.lifetime
    }

    pub fn entry(&self) -> &ServiceEntry {
        &self.entry
    }
}

/// `ServiceCollection` 维护宿主可见的服务描述列表。
///
/// # 教案级注释
/// - **目标 (Why)**
///   - 在装配阶段集中登记服务，Builder 门面、录制器与真实宿主共享同一种表示；
///   - 组合层需要把 Builder 上登记的描述原样搬运到宿主，因此列表必须保持插入顺序。
/// - **设计要点 (How)**
///   - 内部使用 `Vec<ServiceDescriptor>`，允许同一契约重复注册；
///   - 解析时以最后一次注册为准，`get_all` 可按注册顺序取回全部实现。
/// - **契约 (What)**
///   - 注册接口永不失败；构造失败推迟到解析或 `validate_on_build` 阶段暴露。
#[derive(Clone, Debug, Default)]
pub struct ServiceCollection {
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条描述。
    pub fn add(&mut self, descriptor: ServiceDescriptor) -> &mut Self {
        self.descriptors.push(descriptor);
        self
    }

    /// 注册现成的单例实例。
    pub fn add_singleton<T>(&mut self, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.add(ServiceDescriptor::singleton(value))
    }

    /// 注册首次解析时才创建的单例。
    pub fn add_singleton_factory<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<T, ServiceError> + Send + Sync + 'static,
    {
        self.add(ServiceDescriptor::factory(ServiceLifetime::Singleton, factory))
    }

    /// 注册每次解析都新建实例的服务。
    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<T, ServiceError> + Send + Sync + 'static,
    {
        self.add(ServiceDescriptor::factory(ServiceLifetime::Transient, factory))
    }

    /// 按顺序追加另一集合的全部描述。
    pub fn extend(&mut self, other: ServiceCollection) -> &mut Self {
        self.descriptors.extend(other.descriptors);
        self
    }

    /// 是否存在 `T` 的注册。
    pub fn contains<T: 'static>(&self) -> bool {
        let contract = TypeId::of::<T>();
        self.descriptors.iter().any(|d| d.contract == contract)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn into_descriptors(self) -> Vec<ServiceDescriptor> {
        self.descriptors
    }
}

/// 由 [`ServiceCollection`] 构建的只读解析器。
///
/// 单例按描述下标缓存；工厂执行期间不持有缓存锁，因此工厂内部可以继续解析其他服务。
/// 并发首次解析同一单例时可能重复调用工厂，但只有先写入缓存的实例会被返回。
pub struct ServiceProvider {
    descriptors: Vec<ServiceDescriptor>,
    singletons: Mutex<HashMap<usize, ServiceInstance>>,
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("descriptor_count", &self.descriptors.len())
            .field("cached_singletons", &self.singletons.lock().len())
            .finish()
    }
}

impl ServiceProvider {
    pub fn new(services: ServiceCollection) -> Self {
        Self {
            descriptors: services.into_descriptors(),
            singletons: Mutex::new(HashMap::new()),
        }
    }

    fn last_index_of(&self, contract: TypeId) -> Option<usize> {
        self.descriptors
            .iter()
            .rposition(|descriptor| descriptor.contract == contract)
    }

    fn resolve_index(&self, index: usize) -> Result<ServiceInstance, ServiceError> {
        let descriptor = &self.descriptors[index];
        let factory = match &descriptor.entry {
            ServiceEntry::Instance(instance) => return Ok(Arc::clone(instance)),
            ServiceEntry::Factory(factory) => factory,
        };
        if descriptor.lifetime == ServiceLifetime::Transient {
            return factory(self);
        }
        if let Some(instance) = self.singletons.lock().get(&index) {
            return Ok(Arc::clone(instance));
        }
        let created = factory(self)?;
        let mut singletons = self.singletons.lock();
        Ok(Arc::clone(singletons.entry(index).or_insert(created)))
    }

    fn downcast<T>(&self, instance: ServiceInstance) -> Result<Arc<T>, ServiceError>
    where
        T: Send + Sync + 'static,
    {
        instance.downcast::<T>().map_err(|_| {
            ServiceError::construction(type_name::<T>(), "registered instance has a different type")
        })
    }

    /// 解析 `T` 的最后一次注册；未注册时返回 `Ok(None)`。
    pub fn get<T>(&self) -> Result<Option<Arc<T>>, ServiceError>
    where
        T: Send + Sync + 'static,
    {
        match self.last_index_of(TypeId::of::<T>()) {
            Some(index) => self.downcast(self.resolve_index(index)?).map(Some),
            None => Ok(None),
        }
    }

    /// 解析 `T`，未注册视为错误。
    pub fn get_required<T>(&self) -> Result<Arc<T>, ServiceError>
    where
        T: Send + Sync + 'static,
    {
        self.get::<T>()?.ok_or(ServiceError::NotRegistered {
            contract: type_name::<T>(),
        })
    }

    /// 按注册顺序解析 `T` 的全部实现。
    pub fn get_all<T>(&self) -> Result<Vec<Arc<T>>, ServiceError>
    where
        T: Send + Sync + 'static,
    {
        let contract = TypeId::of::<T>();
        (0..self.descriptors.len())
            .filter(|&index| self.descriptors[index].contract == contract)
            .map(|index| self.downcast(self.resolve_index(index)?))
            .collect()
    }

    /// 立即创建全部单例，使构造失败在宿主构建阶段暴露。
    pub fn validate(&self) -> Result<(), ServiceError> {
        for index in 0..self.descriptors.len() {
            if self.descriptors[index].lifetime == ServiceLifetime::Singleton {
                self.resolve_index(index)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// 服务容器工厂契约，宿主通过它把描述列表变成解析器。
pub trait ServiceProviderFactory: fmt::Debug {
    fn create_service_provider(
        &self,
        services: ServiceCollection,
    ) -> Result<ServiceProvider, ServiceError>;
}

/// 默认容器工厂。
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultServiceProviderFactory {
    /// 为真时在构建阶段预先创建全部单例。
    pub validate_on_build: bool,
}

impl DefaultServiceProviderFactory {
    pub fn validating() -> Self {
        Self {
            validate_on_build: true,
        }
    }
}

impl ServiceProviderFactory for DefaultServiceProviderFactory {
    fn create_service_provider(
        &self,
        services: ServiceCollection,
    ) -> Result<ServiceProvider, ServiceError> {
        let provider = ServiceProvider::new(services);
        if self.validate_on_build {
            provider.validate()?;
        }
        Ok(provider)
    }
}
