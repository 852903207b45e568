//! # environment 模块说明
//!
//! ## 角色定位（Why）
//! - 维护应用名称、环境名称、内容根与 Web 根四项宿主环境信息；
//! - 保证两个静态资源提供者（内容根、Web 根）始终与当前路径一致。
//!
//! ## 共享模型（How）
//! - [`WebHostEnvironment`] 是普通的可变结构体，[`SharedEnvironment`] 以 `Rc<RefCell<_>>`
//!   包装它，供 Builder 与两个录制器共享同一实例；
//! - 任何持有句柄的一方写入后，其余持有方立即可见。该句柄刻意不实现 `Send`，
//!   只允许在单线程装配阶段使用。

use std::{
    cell::RefCell,
    fmt, fs, io,
    path::{Component, Path, PathBuf},
    rc::Rc,
    sync::Arc,
};

use crate::{
    configuration::Configuration,
    keys::{DEFAULT_ENVIRONMENT, DEFAULT_WEB_ROOT, host_keys, web_host_keys},
};

/// 静态资源提供者契约。
///
/// # 契约说明（What）
/// - `subpath` 均相对提供者根目录解析，包含 `..` 或绝对路径的请求一律视为不存在；
/// - 空提供者（目录缺失时使用）对所有查询返回“不存在”，从不报错。
pub trait FileProvider: Send + Sync + fmt::Debug {
    /// 提供者根目录；空提供者返回 `None`。
    fn root(&self) -> Option<&Path>;

    /// 判断文件是否存在。
    fn exists(&self, subpath: &str) -> bool;

    /// 读取文件内容。
    fn read(&self, subpath: &str) -> io::Result<Vec<u8>>;

    /// 是否为空提供者。
    fn is_null(&self) -> bool {
        self.root().is_none()
    }
}

/// 目录缺失时使用的空提供者。
#[derive(Clone, Copy, Debug, Default)]
pub struct NullFileProvider;

impl FileProvider for NullFileProvider {
    fn root(&self) -> Option<&Path> {
        None
    }

    fn exists(&self, _subpath: &str) -> bool {
        false
    }

    fn read(&self, subpath: &str) -> io::Result<Vec<u8>> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("`{subpath}` is not served by a null file provider"),
        ))
    }
}

/// 基于本地文件系统的提供者。
#[derive(Clone, Debug)]
pub struct PhysicalFileProvider {
    root: PathBuf,
}

impl PhysicalFileProvider {
    /// 以给定目录为根构造提供者，调用方需保证目录存在。
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 将相对路径限制在根目录之内。
    fn resolve(&self, subpath: &str) -> Option<PathBuf> {
        let relative = Path::new(subpath.trim_start_matches(['/', '\\']));
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl FileProvider for PhysicalFileProvider {
    fn root(&self) -> Option<&Path> {
        Some(&self.root)
    }

    fn exists(&self, subpath: &str) -> bool {
        self.resolve(subpath).is_some_and(|path| path.is_file())
    }

    fn read(&self, subpath: &str) -> io::Result<Vec<u8>> {
        match self.resolve(subpath) {
            Some(path) => fs::read(path),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("`{subpath}` escapes the provider root"),
            )),
        }
    }
}

/// 按目录创建静态资源提供者的工厂。
pub trait FileProviderFactory: Send + Sync + fmt::Debug {
    /// 目录存在时返回可用提供者，否则返回空提供者。
    fn create(&self, directory: &Path) -> Arc<dyn FileProvider>;
}

/// 默认工厂：存在即 [`PhysicalFileProvider`]，缺失即 [`NullFileProvider`]。
#[derive(Clone, Copy, Debug, Default)]
pub struct PhysicalFileProviderFactory;

impl FileProviderFactory for PhysicalFileProviderFactory {
    fn create(&self, directory: &Path) -> Arc<dyn FileProvider> {
        if directory.is_dir() {
            Arc::new(PhysicalFileProvider::new(directory))
        } else {
            Arc::new(NullFileProvider)
        }
    }
}

/// 推断入口模块名称：取当前可执行文件的文件名主干。
pub fn default_application_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned())
}

/// 相对路径按当前工作目录展开为绝对路径。
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// `WebHostEnvironment` 描述宿主运行环境。
///
/// # 教案级注释
/// - **设计目标 (Why)**
///   - 让宿主侧与请求管线侧读到同一份应用名、环境名与目录信息；
///   - 目录变化时立刻重算两个资源提供者，避免读方拿到与路径不一致的提供者。
/// - **关键流程 (How)**
///   - `set_content_root`/`set_web_root` 写入字段后调用 [`resolve_providers`](Self::resolve_providers)；
///   - `apply_setting`/`apply_host_configuration` 把识别的配置键映射到对应 setter。
/// - **契约说明 (What)**
///   - 不存在任何错误路径：目录缺失时提供者退化为 [`NullFileProvider`]；
///   - `content_root` 总是绝对路径，`web_root` 保留原始写法（默认 `wwwroot`）。
#[derive(Clone)]
pub struct WebHostEnvironment {
    application_name: String,
    environment_name: String,
    content_root: PathBuf,
    web_root: String,
    content_root_provider: Arc<dyn FileProvider>,
    web_root_provider: Arc<dyn FileProvider>,
    provider_factory: Arc<dyn FileProviderFactory>,
}

impl fmt::Debug for WebHostEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebHostEnvironment")
            .field("application_name", &self.application_name)
            .field("environment_name", &self.environment_name)
            .field("content_root", &self.content_root)
            .field("web_root", &self.web_root)
            .field("content_root_provider", &self.content_root_provider)
            .field("web_root_provider", &self.web_root_provider)
            .finish()
    }
}

impl Default for WebHostEnvironment {
    fn default() -> Self {
        let content_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(
            default_application_name(),
            DEFAULT_ENVIRONMENT,
            content_root,
            DEFAULT_WEB_ROOT,
        )
    }
}

impl WebHostEnvironment {
    /// 使用默认文件工厂构造环境，并立即解析两个提供者。
    pub fn new(
        application_name: impl Into<String>,
        environment_name: impl Into<String>,
        content_root: impl AsRef<Path>,
        web_root: impl Into<String>,
    ) -> Self {
        Self::with_provider_factory(
            application_name,
            environment_name,
            content_root,
            web_root,
            Arc::new(PhysicalFileProviderFactory),
        )
    }

    /// 指定文件工厂构造环境。
    pub fn with_provider_factory(
        application_name: impl Into<String>,
        environment_name: impl Into<String>,
        content_root: impl AsRef<Path>,
        web_root: impl Into<String>,
        provider_factory: Arc<dyn FileProviderFactory>,
    ) -> Self {
        let mut environment = Self {
            application_name: application_name.into(),
            environment_name: environment_name.into(),
            content_root: absolutize(content_root.as_ref()),
            web_root: web_root.into(),
            content_root_provider: Arc::new(NullFileProvider),
            web_root_provider: Arc::new(NullFileProvider),
            provider_factory,
        };
        environment.resolve_providers();
        environment
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn environment_name(&self) -> &str {
        &self.environment_name
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    pub fn web_root(&self) -> &str {
        &self.web_root
    }

    /// Web 根的绝对路径：绝对写法原样返回，相对写法拼接在内容根之下。
    pub fn web_root_full_path(&self) -> PathBuf {
        let web_root = Path::new(&self.web_root);
        if web_root.is_absolute() {
            web_root.to_path_buf()
        } else {
            self.content_root.join(web_root)
        }
    }

    pub fn content_root_file_provider(&self) -> Arc<dyn FileProvider> {
        Arc::clone(&self.content_root_provider)
    }

    pub fn web_root_file_provider(&self) -> Arc<dyn FileProvider> {
        Arc::clone(&self.web_root_provider)
    }

    pub fn set_application_name(&mut self, name: impl Into<String>) {
        self.application_name = name.into();
    }

    pub fn set_environment_name(&mut self, name: impl Into<String>) {
        self.environment_name = name.into();
    }

    /// 更新内容根；相对路径按当前工作目录展开。
    pub fn set_content_root(&mut self, path: impl AsRef<Path>) {
        self.content_root = absolutize(path.as_ref());
        self.resolve_providers();
    }

    pub fn set_web_root(&mut self, path: impl Into<String>) {
        self.web_root = path.into();
        self.resolve_providers();
    }

    /// 依据当前路径重新解析两个资源提供者。
    pub fn resolve_providers(&mut self) {
        self.content_root_provider = self.provider_factory.create(&self.content_root);
        self.web_root_provider = self.provider_factory.create(&self.web_root_full_path());
    }

    /// 环境名称比较不区分大小写。
    pub fn is_environment(&self, name: &str) -> bool {
        self.environment_name.eq_ignore_ascii_case(name)
    }

    pub fn is_development(&self) -> bool {
        self.is_environment("Development")
    }

    pub fn is_production(&self) -> bool {
        self.is_environment("Production")
    }

    /// 将一个 Web 宿主设置写入环境。
    ///
    /// 返回值表示 `key` 是否为四个识别键之一；非识别键不产生任何副作用。
    pub fn apply_setting(&mut self, key: &str, value: &str) -> bool {
        if key.eq_ignore_ascii_case(web_host_keys::APPLICATION_KEY) {
            self.set_application_name(value);
        } else if key.eq_ignore_ascii_case(web_host_keys::CONTENT_ROOT_KEY) {
            self.set_content_root(value);
        } else if key.eq_ignore_ascii_case(web_host_keys::ENVIRONMENT_KEY) {
            self.set_environment_name(value);
        } else if key.eq_ignore_ascii_case(web_host_keys::WEB_ROOT_KEY) {
            self.set_web_root(value);
        } else {
            return false;
        }
        true
    }

    /// 读取宿主配置中的三项环境键，缺失的键保持原值。
    pub fn apply_host_configuration(&mut self, configuration: &Configuration) {
        if let Some(name) = configuration.get(host_keys::APPLICATION_KEY) {
            self.set_application_name(name);
        }
        if let Some(name) = configuration.get(host_keys::ENVIRONMENT_KEY) {
            self.set_environment_name(name);
        }
        if let Some(root) = configuration.get(host_keys::CONTENT_ROOT_KEY) {
            self.set_content_root(root);
        }
    }

    /// 当前环境对应的四项 Web 宿主设置，顺序固定。
    pub fn as_settings(&self) -> [(&'static str, String); 4] {
        [
            (web_host_keys::APPLICATION_KEY, self.application_name.clone()),
            (
                web_host_keys::CONTENT_ROOT_KEY,
                self.content_root.to_string_lossy().into_owned(),
            ),
            (web_host_keys::ENVIRONMENT_KEY, self.environment_name.clone()),
            (web_host_keys::WEB_ROOT_KEY, self.web_root.clone()),
        ]
    }
}

/// 指向同一 [`WebHostEnvironment`] 的共享句柄。
///
/// - **所有权**：顶层 Builder 创建并持有首个句柄，录制器持有克隆；克隆只增加引用计数，不复制环境；
/// - **借用纪律**：所有方法都在方法内部完成借用，不向外泄露 `Ref`/`RefMut`，
///   因此不会出现跨调用的借用冲突。
#[derive(Clone, Debug, Default)]
pub struct SharedEnvironment {
    inner: Rc<RefCell<WebHostEnvironment>>,
}

impl SharedEnvironment {
    pub fn new(environment: WebHostEnvironment) -> Self {
        Self {
            inner: Rc::new(RefCell::new(environment)),
        }
    }

    /// 复制一份当前环境的快照。
    pub fn snapshot(&self) -> WebHostEnvironment {
        self.inner.borrow().clone()
    }

    /// 以只读方式访问环境。
    pub fn with<R>(&self, read: impl FnOnce(&WebHostEnvironment) -> R) -> R {
        read(&self.inner.borrow())
    }

    /// 以可写方式访问环境。
    pub fn update<R>(&self, write: impl FnOnce(&mut WebHostEnvironment) -> R) -> R {
        write(&mut self.inner.borrow_mut())
    }

    pub fn application_name(&self) -> String {
        self.with(|env| env.application_name().to_owned())
    }

    pub fn environment_name(&self) -> String {
        self.with(|env| env.environment_name().to_owned())
    }

    pub fn content_root(&self) -> PathBuf {
        self.with(|env| env.content_root().to_path_buf())
    }

    pub fn web_root(&self) -> String {
        self.with(|env| env.web_root().to_owned())
    }

    pub fn content_root_file_provider(&self) -> Arc<dyn FileProvider> {
        self.with(WebHostEnvironment::content_root_file_provider)
    }

    pub fn web_root_file_provider(&self) -> Arc<dyn FileProvider> {
        self.with(WebHostEnvironment::web_root_file_provider)
    }

    pub fn set_application_name(&self, name: impl Into<String>) {
        self.update(|env| env.set_application_name(name));
    }

    pub fn set_environment_name(&self, name: impl Into<String>) {
        self.update(|env| env.set_environment_name(name));
    }

    pub fn set_content_root(&self, path: impl AsRef<Path>) {
        self.update(|env| env.set_content_root(path));
    }

    pub fn set_web_root(&self, path: impl Into<String>) {
        self.update(|env| env.set_web_root(path));
    }

    /// 判断两个句柄是否指向同一环境实例。
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_directories_degrade_to_null_providers() {
        let env = WebHostEnvironment::new(
            "app",
            "Production",
            "/definitely/not/a/real/spark/root",
            "wwwroot",
        );
        assert!(env.content_root_file_provider().is_null());
        assert!(env.web_root_file_provider().is_null());
        assert!(!env.web_root_file_provider().exists("index.html"));
    }

    #[test]
    fn content_root_change_re_resolves_web_root_provider() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("wwwroot")).expect("create wwwroot");
        fs::write(dir.path().join("wwwroot").join("index.html"), b"hello").expect("write");

        let shared = SharedEnvironment::new(WebHostEnvironment::new(
            "app",
            "Development",
            "/definitely/not/a/real/spark/root",
            "wwwroot",
        ));
        let observer = shared.clone();
        assert!(observer.web_root_file_provider().is_null());

        shared.set_content_root(dir.path());

        assert_eq!(observer.content_root(), dir.path());
        let provider = observer.web_root_file_provider();
        assert!(!provider.is_null());
        assert_eq!(provider.read("/index.html").expect("read"), b"hello");
    }

    #[test]
    fn resolving_twice_yields_equivalent_providers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env = WebHostEnvironment::new("app", "Development", dir.path(), "wwwroot");

        env.set_content_root(dir.path());
        let first = (
            env.content_root_file_provider().is_null(),
            env.web_root_file_provider().is_null(),
        );
        env.set_content_root(dir.path());
        let second = (
            env.content_root_file_provider().is_null(),
            env.web_root_file_provider().is_null(),
        );

        assert_eq!(first, (false, true));
        assert_eq!(first, second);
        assert_eq!(env.content_root_file_provider().root(), Some(dir.path()));
    }

    #[test]
    fn physical_provider_rejects_parent_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("secret.txt"), b"x").expect("write");
        let nested = dir.path().join("public");
        fs::create_dir(&nested).expect("mkdir");

        let provider = PhysicalFileProvider::new(&nested);
        assert!(!provider.exists("../secret.txt"));
        assert!(provider.read("../secret.txt").is_err());
    }

    #[test]
    fn recognised_settings_update_fields() {
        let mut env = WebHostEnvironment::default();
        assert!(env.apply_setting("APPLICATIONNAME", "orders"));
        assert!(env.apply_setting(web_host_keys::ENVIRONMENT_KEY, "Staging"));
        assert!(env.apply_setting(web_host_keys::WEB_ROOT_KEY, "public"));
        assert!(!env.apply_setting("urls", "http://localhost:5000"));

        assert_eq!(env.application_name(), "orders");
        assert!(env.is_environment("staging"));
        assert!(!env.is_development());
        assert_eq!(env.web_root(), "public");
        assert_eq!(env.web_root_full_path(), env.content_root().join("public"));
    }

    #[test]
    fn default_environment_is_development_with_inferred_name() {
        let env = WebHostEnvironment::default();
        assert!(env.is_development());
        assert_eq!(env.application_name(), default_application_name());
        assert!(env.content_root().is_absolute());
        assert_eq!(env.web_root(), DEFAULT_WEB_ROOT);
    }
}
