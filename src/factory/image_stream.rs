use crate::crd::Image;
use crate::factory::MetaDefaults;
use crate::openshift::image::{
    ImageLookupPolicy, ImageStream, ImageStreamSpec, ImageStreamTag, TagImportPolicy,
    TagReference, TagReferencePolicy,
};
use crate::openshift::ImageReference;

pub const REFERENCE_POLICY_LOCAL: &str = "Local";

/// A stream that receives the output of a build. Local lookup lets workloads reference the stream by
/// name instead of through the registry url.
pub fn build_output_stream(name: &str, meta: &MetaDefaults) -> ImageStream {
    ImageStream {
        metadata: meta.object_meta(name),
        spec: ImageStreamSpec {
            lookup_policy: Some(ImageLookupPolicy { local: true }),
            tags: Vec::new(),
        },
        status: None,
    }
}

fn import_tag(image: &Image) -> TagReference {
    TagReference {
        name: image.tag_or_latest().to_owned(),
        from: Some(ImageReference::docker_image(image.to_string())),
        import_policy: Some(TagImportPolicy {
            insecure: false,
            scheduled: true,
        }),
        reference_policy: Some(TagReferencePolicy {
            type_: REFERENCE_POLICY_LOCAL.to_owned(),
        }),
    }
}

/// A stream named after the image that imports it from its external registry
pub fn imported_stream(image: &Image, meta: &MetaDefaults) -> ImageStream {
    ImageStream {
        metadata: meta.object_meta(image.name.as_str()),
        spec: ImageStreamSpec {
            lookup_policy: Some(ImageLookupPolicy { local: true }),
            tags: vec![import_tag(image)],
        },
        status: None,
    }
}

/// The tag to create when the stream exists but does not track the image's tag yet
pub fn image_stream_tag(image: &Image, meta: &MetaDefaults) -> ImageStreamTag {
    ImageStreamTag {
        metadata: meta.object_meta(image.stream_tag()),
        tag: Some(import_tag(image)),
        image: Default::default(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resource::Labels;

    fn meta() -> MetaDefaults {
        MetaDefaults {
            app: "data-index".to_owned(),
            namespace: "kogito".to_owned(),
            labels: Labels::new(),
            annotations: Labels::new(),
        }
    }

    #[test]
    fn imported_stream_tracks_the_image_tag() {
        let image = Image::new("quay.io", "kiegroup", "kogito-data-index", "0.9.0");
        let stream = imported_stream(&image, &meta());
        assert_eq!(Some("kogito-data-index"), stream.metadata.name.as_deref());
        let tag = stream.tag("0.9.0").unwrap();
        assert_eq!(
            "quay.io/kiegroup/kogito-data-index:0.9.0",
            tag.from.as_ref().unwrap().name
        );

        let stream_tag = image_stream_tag(&image, &meta());
        assert_eq!(Some("kogito-data-index:0.9.0"), stream_tag.metadata.name.as_deref());
    }
}
