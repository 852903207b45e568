//! Web 应用组合层端到端验证
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：调用方只接触 `WebApplicationBuilder` 与 `WebApplication`，
//!   录制、回放、配置与服务复制、宿主启动时的拼接都应在这两个入口背后正确发生。
//! - **结构说明 (How)**：每个用例从公开 API 出发构建应用，再通过环境、配置、服务容器
//!   以及一次请求分发观察结果；需要文件系统的用例使用 `tempfile` 隔离内容根。
//! - **合同与边界 (What)**：
//!   - 录制器写入的设置立即反映到 Builder 环境，并在构建后出现在真实服务器设置中；
//!   - `configuration()`、`services()` 的登记按顺序进入真实宿主；
//!   - 协作方错误（配置文件缺失、容器校验失败）原样从 `build` 返回；
//!   - 构建之后、启动之前登记的中间件与端点在启动时生效。

use std::{
    fs,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use spark_webapp::{
    ConfigurationError, DefaultServiceProviderFactory, HostBuilder, HttpContext, LogProvider,
    LoggingOptions, ServiceError, ServiceProvider, WebAppError, WebApplication,
    WebApplicationBuilder, WebApplicationOptions, WebHostBuilder, WebHostEnvironment,
    environment::default_application_name,
    keys::{host_keys, web_host_keys},
};

#[derive(Debug, PartialEq)]
struct Greeting(&'static str);

#[test]
fn application_name_defaults_and_setting_override_reach_the_server() {
    let mut builder = WebApplication::builder();
    assert_eq!(builder.environment().application_name(), default_application_name());

    builder
        .web_host()
        .use_setting(web_host_keys::APPLICATION_KEY, "custom".to_owned());
    assert_eq!(builder.environment().application_name(), "custom");

    let app = builder.build().expect("build");
    assert_eq!(app.environment().application_name(), "custom");

    let server = app.host().server().expect("web server configured");
    assert_eq!(
        server.settings().get("applicationname").map(String::as_str),
        Some("custom")
    );
}

#[test]
fn explicit_options_override_command_line_bootstrap() {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = WebApplicationOptions {
        args: vec!["--environment=Staging".to_owned(), "--feature=on".to_owned()],
        environment_name: Some("Production".to_owned()),
        content_root_path: Some(dir.path().to_path_buf()),
        ..WebApplicationOptions::default()
    };
    fs::write(
        dir.path().join("appsettings.Production.toml"),
        "[Banner]\ntext = \"production\"\n",
    )
    .expect("write settings");

    let builder = WebApplicationBuilder::new(options);
    assert_eq!(builder.environment().environment_name(), "Production");
    assert_eq!(builder.environment().content_root(), dir.path());

    let app = builder.build().expect("build");
    assert!(app.environment().is_production());
    assert_eq!(app.configuration().get("banner:text"), Some("production"));
    assert_eq!(app.configuration().get("feature"), Some("on"));
}

#[test]
fn command_line_arguments_feed_bootstrap_and_configuration() {
    let app = WebApplicationBuilder::create(["--environment=Staging", "--greeting", "hi"])
        .build()
        .expect("build");
    assert_eq!(app.environment().environment_name(), "Staging");
    assert_eq!(app.configuration().get("greeting"), Some("hi"));
}

#[test]
fn host_configuration_updates_environment_immediately() {
    let mut builder = WebApplication::builder();
    builder.host().configure_host_configuration(Box::new(|config| {
        config.add_in_memory([(host_keys::ENVIRONMENT_KEY, "QA")]);
    }));
    assert_eq!(builder.environment().environment_name(), "QA");

    let app = builder.build().expect("build");
    assert!(app.environment().is_environment("qa"));
    assert_eq!(app.configuration().get(host_keys::ENVIRONMENT_KEY), Some("QA"));
}

#[test]
fn configuration_sources_and_services_are_copied_in_order() {
    let mut builder = WebApplication::builder();
    builder
        .configuration()
        .add_in_memory([("greeting", "first"), ("only-first", "yes")])
        .add_in_memory([("greeting", "second")]);
    builder.services().add_singleton(Greeting("hello"));

    let observed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&observed);
    builder.host().configure_services(Box::new(move |context, services| {
        // 宿主回调看到的是最终应用配置。
        if context.configuration.get("greeting") == Some("second") {
            seen.fetch_add(1, Ordering::SeqCst);
        }
        services.add_singleton(Greeting("from-host"));
    }));

    let app = builder.build().expect("build");
    assert_eq!(app.configuration().get("greeting"), Some("second"));
    assert_eq!(app.configuration().get("only-first"), Some("yes"));
    assert_eq!(observed.load(Ordering::SeqCst), 1);

    // `services()` 的登记在宿主回调之后追加，因此最后一次注册胜出。
    let greeting = app.services().get_required::<Greeting>().expect("greeting");
    assert_eq!(*greeting, Greeting("hello"));
    let all = app.services().get_all::<Greeting>().expect("all greetings");
    assert_eq!(all.len(), 2);

    let environment = app
        .services()
        .get_required::<WebHostEnvironment>()
        .expect("environment service");
    assert_eq!(environment.application_name(), app.environment().application_name());
}

#[test]
fn logging_options_are_registered_as_a_singleton() {
    let mut builder = WebApplication::builder();
    builder.logging().clear_providers().add_pretty();

    let app = builder.build().expect("build");
    let options = app
        .services()
        .get_required::<LoggingOptions>()
        .expect("logging options");
    assert_eq!(options.providers(), [LogProvider::Pretty]);
}

#[test]
fn missing_required_configuration_file_fails_the_build() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut builder = WebApplication::builder();
    builder
        .configuration()
        .add_toml_file(dir.path().join("missing.toml"), false);

    let error = builder.build().expect_err("missing file");
    assert!(matches!(
        error,
        WebAppError::Configuration(ConfigurationError::Io { .. })
    ));
}

#[test]
fn validating_factory_surfaces_construction_errors() {
    let mut builder = WebApplication::builder();
    builder
        .host()
        .use_service_provider_factory(Arc::new(DefaultServiceProviderFactory::validating()));
    builder
        .services()
        .add_singleton_factory(|_: &ServiceProvider| -> Result<Greeting, ServiceError> {
            Err(ServiceError::construction("Greeting", "upstream unavailable"))
        });

    let error = builder.build().expect_err("validation failure");
    assert!(matches!(
        error,
        WebAppError::Service(ServiceError::Construction { .. })
    ));
}

#[test]
fn endpoints_registered_after_build_are_dispatched_on_start() {
    let mut app = WebApplication::builder().build().expect("build");
    app.use_fn(|context, next| {
        context.response.write("[");
        next(context)?;
        context.response.write("]");
        Ok(())
    });
    app.map_get("/orders/{id}", |context| {
        let id = context.route_value("id").unwrap_or_default().to_owned();
        let services = context.services().map(|services| services.len()).unwrap_or(0);
        assert!(services > 0);
        context.response.write(id);
        Ok(())
    })
    .expect("route");
    app.map_post("/orders", |context| {
        context.response.status = 201;
        Ok(())
    })
    .expect("route");

    app.start().expect("start");

    let mut context = HttpContext::get("/orders/42");
    app.handle(&mut context).expect("handle");
    assert_eq!(context.response.body, "[42]");

    let mut context = HttpContext::post("/orders");
    app.handle(&mut context).expect("handle");
    assert_eq!(context.response.status, 201);

    let mut context = HttpContext::get("/unknown");
    app.handle(&mut context).expect("handle");
    assert_eq!(context.response.status, 404);

    app.stop().expect("stop");
}

#[test]
fn explicit_routing_places_middleware_between_routing_and_endpoints() {
    let mut app = WebApplication::builder().build().expect("build");
    app.use_fn(|context, next| {
        let routed = context.endpoint().is_some();
        context.response.write(format!("outer:{routed};"));
        next(context)
    });
    app.use_routing();
    app.use_fn(|context, next| {
        let routed = context.endpoint().is_some();
        context.response.write(format!("inner:{routed};"));
        next(context)
    });
    app.use_endpoints().expect("routing enabled");
    app.map_get("/ping", |context| {
        context.response.write("pong");
        Ok(())
    })
    .expect("route");

    app.start().expect("start");
    let mut context = HttpContext::get("/ping");
    app.handle(&mut context).expect("handle");
    assert_eq!(context.response.body, "outer:false;inner:true;pong");
}

#[test]
fn handler_errors_and_lifecycle_violations_are_reported() {
    let mut app = WebApplication::builder().build().expect("build");
    app.run(|_| Err(anyhow::anyhow!("handler exploded")));

    let mut context = HttpContext::get("/");
    assert!(matches!(
        app.handle(&mut context),
        Err(WebAppError::InvalidState(_))
    ));

    app.start().expect("start");
    let error = app.handle(&mut context).expect_err("handler error");
    assert!(matches!(error, WebAppError::Request(_)));
    assert_eq!(error.to_string(), "handler exploded");

    assert!(matches!(app.start(), Err(WebAppError::InvalidState(_))));
}
