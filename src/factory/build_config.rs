//! The two stage build of a `KogitoApp`. The S2I build `<app>-builder` compiles the sources with the
//! builder image of the runtime, and the runtime build `<app>` copies the binaries it produced into
//! the slim runtime image.
use crate::config::ImageDefaults;
use crate::crd::{env_var, upsert_env, Image, KogitoApp, ServiceSpec};
use crate::error::ReconcileError;
use crate::factory::{builder_name, MetaDefaults, BUILD_TYPE_RUNTIME, BUILD_TYPE_S2I, LABEL_BUILD_TYPE};
use crate::openshift::build::{
    BuildConfig, BuildConfigSpec, BuildOutput, BuildSource, BuildStrategy, BuildTriggerPolicy,
    GitBuildSource, ImageSource, ImageSourcePath, SourceBuildStrategy, SOURCE_TYPE_BINARY,
    SOURCE_TYPE_GIT, SOURCE_TYPE_IMAGE, STRATEGY_TYPE_SOURCE,
};
use crate::openshift::ImageReference;
use crate::resource::KubeObject;

use k8s_openapi::api::core::v1::EnvVar;

pub const RUN_POLICY_SERIAL: &str = "Serial";
pub const OUTPUT_TAG: &str = "latest";
pub const ENV_NATIVE: &str = "NATIVE";
pub const ENV_RUNTIME_TYPE: &str = "RUNTIME_TYPE";

/// Where the S2I images leave the compiled service
pub const BUILD_OUTPUT_DIR: &str = "/home/kogito/bin";

pub fn output_stream_tag(stream: &str) -> String {
    format!("{}:{}", stream, OUTPUT_TAG)
}

fn base_image_reference(image: &Image) -> ImageReference {
    ImageReference::docker_image(image.to_string())
}

fn build_labels(meta: &MetaDefaults, build_type: &str) -> crate::resource::Labels {
    let mut labels = meta.labels.clone();
    labels.insert(LABEL_BUILD_TYPE.to_owned(), build_type.to_owned());
    labels
}

/// The S2I builder image, either the default one for the runtime or the override from the custom
/// resource, completed with the defaults
pub fn s2i_base_image(app: &KogitoApp, images: &ImageDefaults) -> Image {
    let default_image = images.s2i_image(app.spec.runtime());
    match app.spec.build.image_s2i.as_ref() {
        Some(image) => image.or_defaults(&default_image),
        None => default_image,
    }
}

pub fn runtime_base_image(app: &KogitoApp, images: &ImageDefaults) -> Image {
    let default_image = images.runtime_image(app.spec.runtime(), app.spec.build.native);
    match app.spec.build.image_runtime.as_ref() {
        Some(image) => image.or_defaults(&default_image),
        None => default_image,
    }
}

/// The environment of the S2I build: the user's build env plus the variables the builder images read
pub fn s2i_build_env(app: &KogitoApp) -> Vec<EnvVar> {
    let mut env = Vec::with_capacity(app.spec.build.env.len() + 2);
    for var in app.spec.build.env.iter().cloned() {
        upsert_env(&mut env, var);
    }
    upsert_env(&mut env, env_var(ENV_RUNTIME_TYPE, &app.spec.runtime().to_string()));
    upsert_env(&mut env, env_var(ENV_NATIVE, &app.spec.build.native.to_string()));
    env
}

pub fn s2i_build_config(app: &KogitoApp, meta: &MetaDefaults, images: &ImageDefaults) -> BuildConfig {
    let name = builder_name(app.name());
    let source = match app.git_source() {
        Some(git) => BuildSource {
            type_: SOURCE_TYPE_GIT.to_owned(),
            git: Some(GitBuildSource {
                uri: git.uri.clone(),
                reference: git.reference.clone(),
            }),
            context_dir: git.context_dir.clone(),
            images: Vec::new(),
        },
        None => BuildSource {
            type_: SOURCE_TYPE_BINARY.to_owned(),
            ..Default::default()
        },
    };

    BuildConfig {
        metadata: meta.object_meta_with_labels(name.as_str(), build_labels(meta, BUILD_TYPE_S2I)),
        spec: BuildConfigSpec {
            triggers: vec![BuildTriggerPolicy::image_change(None)],
            run_policy: Some(RUN_POLICY_SERIAL.to_owned()),
            source,
            strategy: BuildStrategy {
                type_: STRATEGY_TYPE_SOURCE.to_owned(),
                source_strategy: Some(SourceBuildStrategy {
                    from: base_image_reference(&s2i_base_image(app, images)),
                    env: s2i_build_env(app),
                    incremental: Some(app.spec.build.incremental),
                }),
            },
            output: BuildOutput {
                to: Some(ImageReference::image_stream_tag(output_stream_tag(&name))),
            },
            resources: app.spec.build.resources.clone(),
        },
        status: None,
    }
}

/// The runtime build takes its binaries from the output image of the S2I build, and is triggered
/// whenever that image changes. It is an error for the S2I build to have no output.
pub fn runtime_build_config(
    app: &KogitoApp,
    s2i_build: &BuildConfig,
    meta: &MetaDefaults,
    images: &ImageDefaults,
) -> Result<BuildConfig, ReconcileError> {
    let s2i_output = s2i_build.output_image().cloned().ok_or_else(|| {
        ReconcileError::structural(format!(
            "BuildConfig {} has no output image for the runtime build of {}",
            s2i_build.object_id(),
            app.object_id()
        ))
    })?;
    let name = app.name().to_owned();

    Ok(BuildConfig {
        metadata: meta.object_meta_with_labels(name.as_str(), build_labels(meta, BUILD_TYPE_RUNTIME)),
        spec: BuildConfigSpec {
            triggers: vec![BuildTriggerPolicy::image_change(Some(s2i_output.clone()))],
            run_policy: Some(RUN_POLICY_SERIAL.to_owned()),
            source: BuildSource {
                type_: SOURCE_TYPE_IMAGE.to_owned(),
                images: vec![ImageSource {
                    from: s2i_output,
                    paths: vec![ImageSourcePath {
                        source_path: BUILD_OUTPUT_DIR.to_owned(),
                        destination_dir: ".".to_owned(),
                    }],
                }],
                ..Default::default()
            },
            strategy: BuildStrategy {
                type_: STRATEGY_TYPE_SOURCE.to_owned(),
                source_strategy: Some(SourceBuildStrategy {
                    from: base_image_reference(&runtime_base_image(app, images)),
                    env: Vec::new(),
                    incremental: None,
                }),
            },
            output: BuildOutput {
                to: Some(ImageReference::image_stream_tag(output_stream_tag(&name))),
            },
            resources: None,
        },
        status: None,
    })
}
